//! Core type definitions.
//!
//! These types provide strong typing for the kernel primitives.

/// Tick counter type. Wraps on overflow.
pub type Tick = u32;

/// Signed tick difference, used only to test "in the past".
pub type DiffTick = i32;

/// Counter type for semaphores, queues and FIFOs.
pub type Len = u16;

/// Task priority. Higher value means higher priority. Valid priorities are
/// `0..CFG_MAX_PRIORITY`; [`NO_TASK_PRIORITY`] is strictly below all of them.
pub type Priority = i8;

/// Priority reported when no task is running.
pub const NO_TASK_PRIORITY: Priority = -1;

/// Maximum delay value. Pending with `MAX_DELAY` suspends without a timeout.
pub const MAX_DELAY: Tick = Tick::MAX;

/// Runtime counter type for the statistics feature.
#[cfg(feature = "statistics")]
pub type RunTime = u32;

/// Task entry point. The task yields by returning.
pub type TaskFunction = fn(*mut ());

/// Untyped parameter passed to a task function.
pub type TaskParameter = *mut ();

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Not yet registered with the kernel
    NotInitialized = 0,
    /// Eligible to run (present in the ready table)
    Ready = 1,
    /// Waiting for a tick (delay list) or an event with timeout
    Blocked = 2,
    /// Waiting indefinitely; only an event or a resume wakes it
    Suspended = 3,
}

/// Scheduling mode, selectable at runtime within a `preemption` build.
#[cfg(feature = "preemption")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelMode {
    /// Tasks run to completion; higher-priority tasks wait for the next
    /// scheduling point.
    Cooperative,
    /// A task that becomes ready above the current priority runs as soon as
    /// the scheduler is unlocked.
    Preemptive,
}
