//! Tick handling.
//!
//! The tick interrupt only increments a deferred counter; the real work
//! (promoting timed-out tasks, draining interrupt wakeups) happens in the
//! unlock loop with the scheduler locked, so blocked-task promotion races
//! with task code only at well-defined points.

use crate::kernel::{scheduler_lock, scheduler_unlock, FLAGS, STATE};
use crate::list::List;
use crate::port;
use crate::types::{TaskState, Tick};
use core::ptr::NonNull;

#[cfg(feature = "preemption")]
use crate::config::CFG_PREEMPT_LIMIT;
#[cfg(feature = "preemption")]
use crate::task::CurrentTask;
#[cfg(any(feature = "preemption", feature = "priority-inheritance"))]
use crate::types::Priority;
#[cfg(feature = "preemption")]
use crate::types::NO_TASK_PRIORITY;

/// Increment the kernel tick. Call this from the platform tick interrupt.
pub fn kernel_tick() {
    scheduler_lock();
    FLAGS.delayed_tick_increment();
    FLAGS.set_unlock_pending();
    scheduler_unlock();
}

/// Current kernel tick.
pub fn get_tick() -> Tick {
    scheduler_lock();
    let tick = FLAGS.tick();
    scheduler_unlock();
    tick
}

/// Force the tick counter to a value. Test-harness plumbing for exercising
/// rollover paths without waiting out the counter.
#[doc(hidden)]
pub fn time_travel(tick: Tick) {
    FLAGS.set_tick(tick);
}

/// Raise the higher-ready flag if `priority` outranks the current task and
/// sits inside the preemptible band.
#[cfg(feature = "preemption")]
pub(crate) fn note_ready_for_preemption(priority: Priority) {
    if CFG_PREEMPT_LIMIT > 0 && priority < CFG_PREEMPT_LIMIT {
        return;
    }

    // Inside a critical section: current_task can be read directly.
    let current_priority = match unsafe { STATE.get_unchecked() }.current_task {
        CurrentTask::Task(task) => unsafe { task.as_ref() }.priority,
        _ => NO_TASK_PRIORITY,
    };
    if priority > current_priority {
        FLAGS.raise_higher_ready();
    }
}

/// Move tasks whose wake tick arrived from the delay list into the ready
/// table. Runs with the scheduler locked and interrupts enabled; one call
/// per consumed tick.
pub(crate) unsafe fn process_tick() {
    let tick = FLAGS.tick();

    if tick == 0 {
        // The tick counter just wrapped: yesterday's overflow list becomes
        // today's current list.
        unsafe { STATE.get_unchecked() }.swap_delay_lists();
    }

    loop {
        let head = match unsafe { STATE.get_unchecked() }.delay_list_current().head() {
            Some(head) => head,
            None => break,
        };
        if unsafe { head.as_ref() }.value() != tick {
            break;
        }

        let task = unsafe { head.as_ref() }.owner().unwrap();
        unsafe { List::unlink(head) };

        port::interrupts_disable();

        let task_ref = unsafe { &mut *task.as_ptr() };
        task_ref.state = TaskState::Ready;

        // A task blocked on an event with timeout is also in the event
        // list; the timeout cancels the wait.
        if task_ref.event_node.is_linked() {
            unsafe { List::unlink(NonNull::from(&mut task_ref.event_node)) };
        }

        #[cfg(feature = "priority-inheritance")]
        demote_boosted_occupant(task, task_ref.priority);

        unsafe { STATE.get_unchecked() }.ready[task_ref.priority as usize] = Some(task);

        #[cfg(feature = "preemption")]
        note_ready_for_preemption(task_ref.priority);

        port::interrupts_enable();
    }
}

/// Promote every task an interrupt resumed into the ready table. Runs with
/// the scheduler locked and interrupts enabled.
pub(crate) unsafe fn drain_pending_ready() {
    port::interrupts_disable();

    loop {
        let node = match unsafe { STATE.get_unchecked() }.pending_ready.head() {
            Some(node) => node,
            None => break,
        };
        let task = unsafe { node.as_ref() }.owner().unwrap();
        unsafe { List::unlink(node) };

        #[cfg(feature = "preemption")]
        note_ready_for_preemption(unsafe { task.as_ref() }.priority);

        port::interrupts_enable();

        let task_ref = unsafe { &mut *task.as_ptr() };
        if task_ref.delay_node.is_linked() {
            unsafe { List::unlink(NonNull::from(&mut task_ref.delay_node)) };
        }
        task_ref.state = TaskState::Ready;

        port::interrupts_disable();

        #[cfg(feature = "priority-inheritance")]
        demote_boosted_occupant(task, task_ref.priority);

        unsafe { STATE.get_unchecked() }.ready[task_ref.priority as usize] = Some(task);
    }

    port::interrupts_enable();
}

/// A waking task can find its ready slot held by a mutex owner that
/// inherited this task's priority; the wake ends that claim, so drop the
/// owner back to its original priority before filling the slot.
///
/// Called with interrupts disabled.
#[cfg(feature = "priority-inheritance")]
fn demote_boosted_occupant(task: NonNull<crate::task::Task>, priority: Priority) {
    let slot = unsafe { STATE.get_unchecked() }.ready[priority as usize];
    if let Some(occupant) = slot {
        if occupant != task {
            let original = unsafe { occupant.as_ref() }.original_priority;
            unsafe { crate::task::task_set_priority(occupant, original) };
        }
    }
}
