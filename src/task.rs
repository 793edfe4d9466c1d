//! Task control.
//!
//! A [`Task`] is a run-to-completion function plus the bookkeeping the
//! kernel needs to schedule it: a state, a priority, and two intrusive list
//! nodes (delay-list and event-list membership). Task storage is provided
//! by the application, typically as a `static`; the kernel only links and
//! unlinks, it never allocates and there is no destroy step.

use crate::config::CFG_MAX_PRIORITY;
use crate::kernel::{get_current_task, scheduler_lock, scheduler_unlock, FLAGS, STATE};
use crate::list::{List, Node};
use crate::critical::CriticalSection;
use crate::port;
use crate::types::{Priority, TaskFunction, TaskParameter, TaskState, Tick};
#[cfg(feature = "statistics")]
use crate::types::RunTime;
use core::ptr::NonNull;

/// The task currently being executed: none (main loop), an interrupt, or a
/// task. The interrupt sentinel lets primitives distinguish ISR callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentTask {
    None,
    Interrupt,
    Task(NonNull<Task>),
}

impl CurrentTask {
    /// The task pointer, if a task is running
    #[inline]
    pub fn task(self) -> Option<NonNull<Task>> {
        match self {
            CurrentTask::Task(task) => Some(task),
            _ => None,
        }
    }
}

fn task_function_unset(_: TaskParameter) {}

/// Task record. Embed in application-owned `static` storage and register
/// with [`task_create`].
pub struct Task {
    pub(crate) state: TaskState,
    pub(crate) function: TaskFunction,
    pub(crate) parameter: TaskParameter,
    pub(crate) priority: Priority,
    pub(crate) original_priority: Priority,
    pub(crate) delay_node: Node<Task>,
    pub(crate) event_node: Node<Task>,
    #[cfg(feature = "statistics")]
    pub(crate) run_time: RunTime,
    #[cfg(feature = "statistics")]
    pub(crate) num_schedules: u32,
}

impl Task {
    pub const fn new() -> Self {
        Task {
            state: TaskState::NotInitialized,
            function: task_function_unset,
            parameter: core::ptr::null_mut(),
            priority: 0,
            original_priority: 0,
            delay_node: Node::new(),
            event_node: Node::new(),
            #[cfg(feature = "statistics")]
            run_time: 0,
            #[cfg(feature = "statistics")]
            num_schedules: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

// Tasks are moved between kernel lists from task and interrupt context; all
// mutation is serialized by the critical-section/scheduler-lock contract.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

/// Register a task with the kernel at the given priority and mark it ready.
///
/// Each priority holds at most one task; creating a second task at an
/// occupied priority is a fatal error.
pub fn task_create(
    task: &'static mut Task,
    priority: Priority,
    function: TaskFunction,
    parameter: TaskParameter,
) {
    unsafe { task_create_raw(NonNull::from(task), priority, function, parameter) }
}

pub(crate) unsafe fn task_create_raw(
    task: NonNull<Task>,
    priority: Priority,
    function: TaskFunction,
    parameter: TaskParameter,
) {
    assert!(
        priority >= 0 && (priority as usize) < CFG_MAX_PRIORITY,
        "task_create(): invalid priority"
    );

    let _cs = CriticalSection::enter();

    let state = unsafe { STATE.get_unchecked() };
    assert!(
        state.ready[priority as usize].is_none(),
        "task_create(): priority already in use"
    );

    let task_ref = unsafe { &mut *task.as_ptr() };
    task_ref.state = TaskState::Ready;
    task_ref.function = function;
    task_ref.parameter = parameter;
    task_ref.priority = priority;
    task_ref.original_priority = priority;
    task_ref.delay_node.init(task);
    task_ref.event_node.init(task);
    #[cfg(feature = "statistics")]
    {
        task_ref.run_time = 0;
        task_ref.num_schedules = 0;
    }

    state.ready[priority as usize] = Some(task);
}

/// Block the current task for `ticks` kernel ticks. Zero returns at once.
///
/// Task-only: fatal when no task is running.
pub fn task_delay(ticks: Tick) {
    scheduler_lock();

    if ticks != 0 {
        let now = FLAGS.tick().wrapping_add(FLAGS.delayed_ticks());
        let wake = now.wrapping_add(ticks);

        let task = match get_current_task() {
            CurrentTask::Task(task) => task,
            other => panic!("task_delay(): no task is running: {:?}", other),
        };
        let task_ref = unsafe { &mut *task.as_ptr() };

        port::interrupts_disable();
        task_ref.state = TaskState::Blocked;
        unsafe { STATE.get_unchecked() }.ready[task_ref.priority as usize] = None;
        port::interrupts_enable();

        // Delay lists are only touched with the scheduler locked, so the
        // ordered insert needs no critical section.
        let state = unsafe { STATE.get_unchecked() };
        let list = if wake > now {
            state.delay_list_current()
        } else {
            // Adding the delay wrapped the tick counter.
            state.delay_list_overflow()
        };
        unsafe { list.insert_ordered(NonNull::from(&mut task_ref.delay_node), wake) };
    }

    scheduler_unlock();
}

/// Make a task ready regardless of what it was waiting on.
///
/// Any-context: callable from tasks and interrupts. The READY transition is
/// deferred to the pending-ready drain at the outermost scheduler unlock.
pub fn task_resume(task: NonNull<Task>) {
    scheduler_lock();
    {
        let _cs = CriticalSection::enter();

        let state = unsafe { STATE.get_unchecked() };
        let task_ref = unsafe { &mut *task.as_ptr() };
        let node = NonNull::from(&mut task_ref.event_node);

        if task_ref.event_node.is_linked() {
            unsafe { List::unlink(node) };
        }
        unsafe { state.pending_ready.insert_last(node) };

        FLAGS.set_unlock_pending();
    }
    scheduler_unlock();
}

/// Suspend a task (`None` suspends the caller). The task holds no delay or
/// event list membership afterwards; only [`task_resume`] wakes it.
///
/// Task-only when suspending self: fatal when no task is running.
pub fn task_suspend(task: Option<NonNull<Task>>) {
    scheduler_lock();
    {
        let _cs = CriticalSection::enter();

        let state = unsafe { STATE.get_unchecked() };
        let task = match task {
            Some(task) => task,
            None => match state.current_task {
                CurrentTask::Task(task) => task,
                other => panic!("task_suspend(): no task is running: {:?}", other),
            },
        };
        let task_ref = unsafe { &mut *task.as_ptr() };

        task_ref.state = TaskState::Suspended;
        state.ready[task_ref.priority as usize] = None;

        if task_ref.delay_node.is_linked() {
            unsafe { List::unlink(NonNull::from(&mut task_ref.delay_node)) };
        }
        if task_ref.event_node.is_linked() {
            unsafe { List::unlink(NonNull::from(&mut task_ref.event_node)) };
        }
    }
    scheduler_unlock();
}

/// A task's current (possibly inherited) priority.
pub fn task_priority(task: NonNull<Task>) -> Priority {
    let _cs = CriticalSection::enter();
    unsafe { task.as_ref() }.priority
}

/// Runtime credited to a task by the statistics clock.
#[cfg(feature = "statistics")]
pub fn task_run_time(task: NonNull<Task>) -> RunTime {
    let _cs = CriticalSection::enter();
    unsafe { task.as_ref() }.run_time
}

/// Number of times a task has been dispatched.
#[cfg(feature = "statistics")]
pub fn task_num_schedules(task: NonNull<Task>) -> u32 {
    let _cs = CriticalSection::enter();
    unsafe { task.as_ref() }.num_schedules
}

/// Change a task's effective priority, preserving its scheduling state:
/// moves the ready-table slot if the task is ready and repositions its
/// event node if it is waiting.
///
/// # Safety
/// Caller holds the scheduler lock and a critical section.
#[cfg(feature = "priority-inheritance")]
pub(crate) unsafe fn task_set_priority(task: NonNull<Task>, priority: Priority) {
    let state = unsafe { STATE.get_unchecked() };
    let task_ref = unsafe { &mut *task.as_ptr() };
    let old_priority = task_ref.priority;

    if old_priority == priority {
        return;
    }
    task_ref.priority = priority;

    if state.ready[old_priority as usize] == Some(task) {
        state.ready[old_priority as usize] = None;
        debug_assert!(state.ready[priority as usize].is_none());
        state.ready[priority as usize] = Some(task);
    }

    if task_ref.event_node.is_linked() {
        // Keep the wait list priority-ordered while preserving the task's
        // blocked/suspended state.
        let node = NonNull::from(&mut task_ref.event_node);
        let list = task_ref.event_node.list_ptr();
        unsafe {
            List::unlink(node);
            crate::event::insert_by_priority(&mut *list, node, priority);
        }
    }
}
