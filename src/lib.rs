//! Single-stack real-time kernel for deeply embedded systems.
//!
//! The kernel multiplexes a fixed number of priority-ordered run-to-completion
//! tasks onto one shared stack and provides:
//! - Cooperative scheduling, with optional preemption across priority levels
//! - Tick-based delays with a two-list overflow-safe delay wheel
//! - Blocking synchronization: semaphores, recursive mutexes (optional
//!   priority inheritance), item queues, byte FIFOs and software timers
//!
//! All kernel and primitive state is caller-provided; the kernel never
//! allocates. Tasks yield by returning from their function and block only at
//! explicit `*_delay`/`*_pend` calls.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod error;
pub mod event;
pub mod kernel;
pub mod list;
pub mod port;
pub mod sched;
pub mod sync;
pub mod task;
pub mod time;
pub mod types;

#[cfg(feature = "software-timers")]
pub mod timer;

// ============ Re-exports ============

pub use config::*;
pub use error::KernelError;
pub use kernel::{kernel_init, kernel_start, scheduler_lock, scheduler_unlock};
pub use sched::scheduler_run;
pub use task::{task_create, task_delay, task_resume, task_suspend, CurrentTask, Task};
pub use time::{get_tick, kernel_tick};
pub use types::*;

pub use sync::fifo::Fifo;
pub use sync::mutex::Mutex;
pub use sync::queue::Queue;
pub use sync::sem::Semaphore;

#[cfg(feature = "software-timers")]
pub use timer::{timer_task_create, Timer, TimerType};
