//! Scheduler.
//!
//! Selects the highest-priority ready task strictly above the current
//! priority and runs it to its next voluntary yield. Tasks share one stack:
//! dispatch is a plain function call, and preemption nests a higher-priority
//! task's invocation inside the scheduling point that woke it.

use crate::config::CFG_MAX_PRIORITY;
#[cfg(feature = "preemption")]
use crate::config::CFG_PREEMPT_LIMIT;
use crate::kernel::{scheduler_lock, scheduler_unlock, STATE};
use crate::port;
use crate::task::{CurrentTask, Task};
use crate::types::{Priority, NO_TASK_PRIORITY};
use core::ptr::NonNull;

#[cfg(feature = "preemption")]
use crate::types::KernelMode;

/// Run the scheduler once. Called from the application main loop; returns
/// when no ready task outranks the main-loop context.
pub fn scheduler_run() {
    scheduler_lock();
    unsafe { schedule_highest() };
    scheduler_unlock();
}

/// Scheduler algorithm. Called with the scheduler locked and interrupts
/// enabled, either from [`scheduler_run`] or from the outermost unlock when
/// preemption raised the higher-ready flag.
pub(crate) unsafe fn schedule_highest() {
    #[cfg(feature = "statistics")]
    {
        // Scheduler locked: current_task is stable.
        let current = unsafe { STATE.get_unchecked() }.current_task;
        port::interrupts_disable();
        let now = port::system_runtime();
        let state = unsafe { STATE.get_unchecked() };
        let elapsed = now.wrapping_sub(state.stats.total_run_time);
        match current {
            CurrentTask::Task(task) => unsafe {
                (*task.as_ptr()).run_time = (*task.as_ptr()).run_time.wrapping_add(elapsed);
            },
            _ => state.stats.no_task_run_time = state.stats.no_task_run_time.wrapping_add(elapsed),
        }
        state.stats.total_run_time = now;
        port::interrupts_enable();
    }

    loop {
        let mut chosen: Option<NonNull<Task>> = None;

        // Scheduler locked: current_task is stable.
        let current_priority = match unsafe { STATE.get_unchecked() }.current_task {
            CurrentTask::Task(task) => unsafe { task.as_ref() }.priority,
            _ => NO_TASK_PRIORITY,
        };

        let mut priority = (CFG_MAX_PRIORITY - 1) as Priority;
        while priority > current_priority {
            // Atomically test the ready slot.
            port::interrupts_disable();
            if let Some(task) = unsafe { STATE.get_unchecked() }.ready[priority as usize] {
                #[cfg(feature = "preemption")]
                let allowed = if CFG_PREEMPT_LIMIT > 0 && crate::kernel::kernel_mode() == KernelMode::Preemptive {
                    // Below the limit tasks run only from the main loop.
                    priority >= CFG_PREEMPT_LIMIT || current_priority == NO_TASK_PRIORITY
                } else {
                    true
                };
                #[cfg(not(feature = "preemption"))]
                let allowed = true;

                if allowed {
                    chosen = Some(task);
                }
                port::interrupts_enable();
                break;
            }
            port::interrupts_enable();
            priority -= 1;
        }

        match chosen {
            Some(task) => unsafe { run_task(task) },
            // No ready task above the current priority.
            None => break,
        }
    }

    #[cfg(feature = "statistics")]
    {
        port::interrupts_disable();
        let now = port::system_runtime();
        let state = unsafe { STATE.get_unchecked() };
        let elapsed = now.wrapping_sub(state.stats.total_run_time);
        state.stats.no_task_run_time = state.stats.no_task_run_time.wrapping_add(elapsed);
        state.stats.total_run_time = now;
        port::interrupts_enable();
    }
}

/// Dispatch one task invocation.
///
/// The scheduler lock is released for the duration of the task function so
/// the task can itself lock, pend and schedule; the previous current-task
/// marker is restored afterwards.
unsafe fn run_task(task: NonNull<Task>) {
    let function = unsafe { task.as_ref() }.function;
    let parameter = unsafe { task.as_ref() }.parameter;

    port::interrupts_disable();

    let previous = {
        let state = unsafe { STATE.get_unchecked() };
        let previous = state.current_task;
        state.current_task = CurrentTask::Task(task);
        previous
    };

    #[cfg(feature = "statistics")]
    {
        let now = port::system_runtime();
        let state = unsafe { STATE.get_unchecked() };
        let elapsed = now.wrapping_sub(state.stats.total_run_time);
        state.stats.no_task_run_time = state.stats.no_task_run_time.wrapping_add(elapsed);
        state.stats.total_run_time = now;
        unsafe {
            (*task.as_ptr()).num_schedules = (*task.as_ptr()).num_schedules.wrapping_add(1);
        }
    }

    port::interrupts_enable();

    crate::trace!("dispatch task at priority {}", unsafe { task.as_ref() }.priority);

    scheduler_unlock();
    function(parameter);
    scheduler_lock();

    port::interrupts_disable();

    unsafe { STATE.get_unchecked() }.current_task = previous;

    #[cfg(feature = "statistics")]
    {
        // Credit the task that just ran, not the one being restored.
        let now = port::system_runtime();
        let state = unsafe { STATE.get_unchecked() };
        let elapsed = now.wrapping_sub(state.stats.total_run_time);
        unsafe {
            (*task.as_ptr()).run_time = (*task.as_ptr()).run_time.wrapping_add(elapsed);
        }
        state.stats.total_run_time = now;
    }

    port::interrupts_enable();
}
