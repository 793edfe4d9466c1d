//! Semaphore. Binary and counting semaphores.
//!
//! A taken binary semaphore is `Semaphore::new(0, 1)`; a counting semaphore
//! with three slots all available is `Semaphore::new(3, 3)`.

use crate::cs_cell::CsCell;
use crate::event::{self, Event};
use crate::kernel::{scheduler_lock, scheduler_unlock};
use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::types::{Len, Tick};

struct SemInner {
    count: Len,
    max: Len,
    event: Event,
}

/// Counting semaphore with a maximum count.
///
/// `0 <= count <= max` always holds. `take`/`give` are usable from any
/// context; `pend` only from tasks.
pub struct Semaphore {
    inner: CsCell<SemInner>,
}

impl Semaphore {
    /// Create a semaphore with `count` of `max` units available.
    pub const fn new(count: Len, max: Len) -> Self {
        assert!(count <= max, "semaphore: count exceeds max");
        Semaphore {
            inner: CsCell::new(SemInner {
                count,
                max,
                event: Event::new(),
            }),
        }
    }

    /// Create a semaphore with no unit available (taken binary semaphore
    /// when `max == 1`).
    pub const fn new_locked(max: Len) -> Self {
        Self::new(0, max)
    }

    /// Create a semaphore with every unit available.
    pub const fn new_unlocked(max: Len) -> Self {
        Self::new(max, max)
    }

    /// Reinitialize. Only valid while no task waits on the semaphore.
    pub fn init(&self, count: Len, max: Len) {
        assert!(count <= max, "semaphore_init(): count exceeds max");
        let _cs = CriticalSection::enter();
        let sem = unsafe { &mut *self.inner.as_ptr() };
        sem.count = count;
        sem.max = max;
        sem.event.init();
    }

    /// Take one unit. Fails when none is available.
    pub fn take(&self) -> KernelResult<()> {
        let _cs = CriticalSection::enter();
        let sem = unsafe { &mut *self.inner.as_ptr() };
        if sem.count > 0 {
            sem.count -= 1;
            Ok(())
        } else {
            Err(KernelError::NotAvailable)
        }
    }

    /// Return one unit and wake the highest-priority waiter. Fails when the
    /// semaphore is already at its maximum; the count is unchanged.
    pub fn give(&self) -> KernelResult<()> {
        let result;
        {
            let _cs = CriticalSection::enter();
            let sem = unsafe { &mut *self.inner.as_ptr() };
            if sem.count < sem.max {
                sem.count += 1;
                result = Ok(());

                scheduler_lock();
                unsafe { event::unblock_one(&mut sem.event.list_read) };
            } else {
                result = Err(KernelError::Overflow);
            }
        }
        if result.is_ok() {
            scheduler_unlock();
        }
        result
    }

    /// Block until the semaphore is given or the timeout expires. Does
    /// nothing if a unit is already available; the caller is expected to
    /// retry [`Semaphore::take`] when rescheduled.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend(&self, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let sem = unsafe { &mut *self.inner.as_ptr() };
        if sem.count == 0 {
            unsafe {
                event::pre_pend_task(&mut sem.event.list_read, task);
                port::interrupts_enable();
                event::pend_task(&mut sem.event.list_read, task, ticks_to_wait);
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Try to take; on failure pend for the timeout. Returns the result of
    /// the take attempt.
    pub fn take_pend(&self, ticks_to_wait: Tick) -> KernelResult<()> {
        let result = self.take();
        if result.is_err() {
            self.pend(ticks_to_wait);
        }
        result
    }

    /// Current count.
    pub fn get_count(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.count
    }

    /// Maximum count. Constant after initialization.
    pub fn get_max(&self) -> Len {
        unsafe { &*self.inner.as_ptr() }.max
    }
}
