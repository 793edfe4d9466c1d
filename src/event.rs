//! Event machinery: the wait queues behind every blocking primitive.
//!
//! An event is one or two priority-ordered task lists. The head is the
//! lowest-priority end; wakeups pop the tail, so the highest-priority
//! waiter wins and equal priorities wake first-come-first-served.
//!
//! Blocking is a two-step protocol. `pre_pend_task` commits the task's
//! event node at the head of the list with interrupts disabled -
//! deliberately the wrong sorted position - so an interrupt that completes
//! the event can already find and remove it. `pend_task` then walks to the
//! correct ordered position with interrupts enabled in bounded windows,
//! revalidating every candidate because an interrupt may mutate the list
//! mid-scan, and finally suspends or delays the task.

use crate::kernel::{FLAGS, STATE};
use crate::list::{List, Node};
use crate::task::{task_delay, CurrentTask, Task};
use crate::port;
#[cfg(feature = "priority-inheritance")]
use crate::types::Priority;
use crate::types::{TaskState, Tick, MAX_DELAY};
use core::ptr::NonNull;

/// Wait queue for primitives with a single blocking side (semaphore,
/// mutex).
pub struct Event {
    pub(crate) list_read: List<Task>,
}

impl Event {
    pub(crate) const fn new() -> Self {
        Event {
            list_read: List::new(),
        }
    }

    pub(crate) fn init(&mut self) {
        self.list_read.init();
    }
}

/// Wait queues for primitives that block both producers and consumers
/// (queue, FIFO).
pub struct EventRw {
    pub(crate) list_read: List<Task>,
    pub(crate) list_write: List<Task>,
}

impl EventRw {
    pub(crate) const fn new() -> Self {
        EventRw {
            list_read: List::new(),
            list_write: List::new(),
        }
    }

    pub(crate) fn init(&mut self) {
        self.list_read.init();
        self.list_write.init();
    }
}

/// Resolve the calling task for a pend operation. Pending is task-only:
/// fatal from the main loop or an interrupt.
pub(crate) fn current_task_for_pend() -> NonNull<Task> {
    match crate::kernel::get_current_task() {
        CurrentTask::Task(task) => task,
        other => panic!("event pend: no task is running: {:?}", other),
    }
}

/// Pend, part 1: advertise the wait by inserting the task's event node at
/// the head of the wait list.
///
/// # Safety
/// Interrupts disabled, scheduler locked. The task must not already be
/// waiting on an event.
pub(crate) unsafe fn pre_pend_task(list: *mut List<Task>, task: NonNull<Task>) {
    let task_ref = unsafe { &mut *task.as_ptr() };
    assert!(
        !task_ref.event_node.is_linked(),
        "event pend: task is already waiting on an event"
    );
    unsafe { (*list).insert_first(NonNull::from(&mut task_ref.event_node)) };
}

/// Scan states for the position search in [`pend_task`].
enum Step {
    /// Walk from the tail looking for the insert position
    Scan,
    /// A candidate vanished mid-walk; start over
    Restart,
    /// Move the node to the found position and block the task
    Commit(Option<NonNull<Node<Task>>>),
    Done,
}

/// Pend, part 2: move the event node to its priority-ordered position, then
/// suspend (`MAX_DELAY`) or delay the task.
///
/// The list may be mutated by interrupts while we search, so the walk
/// re-validates each candidate under disabled interrupts: a candidate whose
/// back-pointer left the list forces a restart, unless our own node was
/// also removed (an interrupt resumed us), in which case there is nothing
/// to do.
///
/// # Safety
/// Interrupts enabled, scheduler locked, `ticks_to_wait != 0`, and the task
/// pre-pended by [`pre_pend_task`].
pub(crate) unsafe fn pend_task(list: *mut List<Task>, task: NonNull<Task>, ticks_to_wait: Tick) {
    let task_ref = unsafe { &mut *task.as_ptr() };
    let node = NonNull::from(&mut task_ref.event_node);
    let priority = task_ref.priority;

    port::interrupts_disable();

    let mut step = Step::Scan;
    loop {
        match step {
            Step::Scan => {
                let mut pos = unsafe { (*list).tail() };

                while let Some(p) = pos {
                    port::interrupts_enable();
                    port::interference_point();

                    let waiter = unsafe { p.as_ref().owner().unwrap() };
                    if unsafe { waiter.as_ref() }.priority < priority {
                        // Insert after this waiter. Equal priorities are
                        // passed over so earlier waiters stay nearer the
                        // tail and wake first.
                        port::interrupts_disable();
                        break;
                    }

                    port::interrupts_disable();
                    if !unsafe { p.as_ref() }.is_in(unsafe { &*list }) {
                        // An interrupt removed this candidate.
                        break;
                    }

                    pos = unsafe { p.as_ref() }.prev();
                }

                let pos_vanished = match pos {
                    Some(p) => !unsafe { p.as_ref() }.is_in(unsafe { &*list }),
                    None => false,
                };
                step = if pos_vanished && unsafe { node.as_ref() }.is_in(unsafe { &*list }) {
                    Step::Restart
                } else {
                    Step::Commit(pos)
                };
            }
            Step::Restart => {
                step = Step::Scan;
            }
            Step::Commit(pos) => {
                if unsafe { node.as_ref() }.is_in(unsafe { &*list }) {
                    if pos != Some(node) {
                        unsafe {
                            List::unlink(node);
                            (*list).insert_after(pos, node);
                        }
                    }

                    if ticks_to_wait == MAX_DELAY {
                        task_ref.state = TaskState::Suspended;
                        unsafe { STATE.get_unchecked() }.ready[priority as usize] = None;
                        port::interrupts_enable();
                    } else {
                        port::interrupts_enable();
                        task_delay(ticks_to_wait);
                    }
                } else {
                    // An interrupt resumed the task during the walk.
                    port::interrupts_enable();
                }
                step = Step::Done;
            }
            Step::Done => break,
        }
    }
}

/// Wake the highest-priority waiter: unlink the tail and hand it to the
/// pending-ready list. The READY transition happens in the pending-ready
/// drain so the calling primitive stays race-free.
///
/// # Safety
/// Scheduler locked, inside a critical section.
pub(crate) unsafe fn unblock_one(list: &mut List<Task>) {
    if let Some(tail) = list.tail() {
        unsafe {
            List::unlink(tail);
            STATE.get_unchecked().pending_ready.insert_last(tail);
        }
        FLAGS.set_unlock_pending();
    }
}

/// Insert a node into a wait list keeping ascending priority order, equal
/// priorities first-come-first-served. Used when priority inheritance moves
/// a waiting task.
///
/// # Safety
/// Caller serializes access to the list (critical section).
#[cfg(feature = "priority-inheritance")]
pub(crate) unsafe fn insert_by_priority(
    list: &mut List<Task>,
    node: NonNull<Node<Task>>,
    priority: Priority,
) {
    let mut pos = list.tail();
    while let Some(p) = pos {
        let waiter = unsafe { p.as_ref().owner().unwrap() };
        if unsafe { waiter.as_ref() }.priority < priority {
            break;
        }
        pos = unsafe { p.as_ref() }.prev();
    }
    unsafe { list.insert_after(pos, node) };
}
