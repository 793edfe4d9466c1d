//! Recursive mutex with optional priority inheritance.
//!
//! The owner may lock again without blocking; the mutex is released when it
//! has been unlocked as many times as it was locked. With the
//! `priority-inheritance` feature, a task that blocks on an owned mutex
//! boosts the owner to its own priority until the final unlock, bounding
//! priority inversion.

use crate::cs_cell::CsCell;
use crate::event::{self, Event};
use crate::kernel::{scheduler_lock, scheduler_unlock, STATE};
use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::task::CurrentTask;
use crate::types::{Len, Tick};

#[cfg(feature = "priority-inheritance")]
use crate::task::task_set_priority;

struct MutexInner {
    count: Len,
    owner: CurrentTask,
    event: Event,
}

/// Recursive mutex. `count == 0` if and only if the mutex has no owner.
///
/// The owner may be a task or, for ISRs bracketed by
/// [`interrupt_lock`](crate::kernel::interrupt_lock), the interrupt
/// sentinel; priority inheritance applies only to task owners.
pub struct Mutex {
    inner: CsCell<MutexInner>,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            inner: CsCell::new(MutexInner {
                count: 0,
                owner: CurrentTask::None,
                event: Event::new(),
            }),
        }
    }

    /// Reinitialize. Only valid while the mutex is unowned and unwatched.
    pub fn init(&self) {
        let _cs = CriticalSection::enter();
        let mtx = unsafe { &mut *self.inner.as_ptr() };
        mtx.count = 0;
        mtx.owner = CurrentTask::None;
        mtx.event.init();
    }

    /// Lock, or re-lock as the current owner. Fails when another context
    /// owns the mutex.
    pub fn lock(&self) -> KernelResult<()> {
        let _cs = CriticalSection::enter();
        let mtx = unsafe { &mut *self.inner.as_ptr() };
        let current = unsafe { STATE.get_unchecked() }.current_task;

        if mtx.count == 0 || mtx.owner == current {
            mtx.count += 1;
            mtx.owner = current;
            Ok(())
        } else {
            Err(KernelError::NotAvailable)
        }
    }

    /// Unlock once. When the lock count reaches zero the owner's priority
    /// is restored (if inherited), ownership clears and the
    /// highest-priority waiter wakes.
    ///
    /// Unlocking an unowned mutex is a fatal error.
    pub fn unlock(&self) {
        let released;
        {
            let _cs = CriticalSection::enter();
            let mtx = unsafe { &mut *self.inner.as_ptr() };

            assert!(mtx.count != 0, "mutex_unlock(): mutex already unlocked");
            mtx.count -= 1;

            if mtx.count == 0 {
                scheduler_lock();

                #[cfg(feature = "priority-inheritance")]
                if let CurrentTask::Task(owner) = mtx.owner {
                    let owner_ref = unsafe { owner.as_ref() };
                    if owner_ref.priority != owner_ref.original_priority {
                        unsafe { task_set_priority(owner, owner_ref.original_priority) };
                    }
                }

                mtx.owner = CurrentTask::None;
                unsafe { event::unblock_one(&mut mtx.event.list_read) };
                released = true;
            } else {
                released = false;
            }
        }
        if released {
            scheduler_unlock();
        }
    }

    /// Block until the mutex is released or the timeout expires. Applies
    /// priority inheritance before blocking. Does nothing if the mutex is
    /// free or already owned by the caller.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend(&self, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let mtx = unsafe { &mut *self.inner.as_ptr() };
        if mtx.count != 0 && mtx.owner != CurrentTask::Task(task) {
            unsafe {
                event::pre_pend_task(&mut mtx.event.list_read, task);
                port::interrupts_enable();
                event::pend_task(&mut mtx.event.list_read, task, ticks_to_wait);
            }

            // Boost only after the waiter left the ready table: its slot
            // must be vacant before the owner can inherit the priority.
            #[cfg(feature = "priority-inheritance")]
            {
                port::interrupts_disable();
                if mtx.count != 0 {
                    if let CurrentTask::Task(owner) = mtx.owner {
                        let waiter_priority = unsafe { task.as_ref() }.priority;
                        if unsafe { owner.as_ref() }.priority < waiter_priority {
                            unsafe { task_set_priority(owner, waiter_priority) };
                        }
                    }
                }
                port::interrupts_enable();
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Try to lock; on failure pend for the timeout. Returns the result of
    /// the lock attempt.
    pub fn lock_pend(&self, ticks_to_wait: Tick) -> KernelResult<()> {
        let result = self.lock();
        if result.is_err() {
            self.pend(ticks_to_wait);
        }
        result
    }

    /// Recursion count of the current owner.
    pub fn get_count(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.count
    }

    /// Current owner, or [`CurrentTask::None`] when unowned.
    pub fn get_owner(&self) -> CurrentTask {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.owner
    }

    /// Whether a lock attempt by the current context would block.
    pub fn is_locked(&self) -> bool {
        let _cs = CriticalSection::enter();
        let mtx = unsafe { &*self.inner.as_ptr() };
        let current = unsafe { STATE.get_unchecked() }.current_task;
        !(mtx.count == 0 || mtx.owner == current)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
