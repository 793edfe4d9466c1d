//! Critical section handling.
//!
//! A critical section saves the interrupt mask, disables maskable interrupts
//! and restores the saved mask on exit, so sections nest freely. The kernel
//! also toggles interrupts directly through [`crate::port`] inside the
//! controlled event-list scans; those windows are deliberate and bounded.

use crate::port;

/// RAII guard for critical sections.
///
/// Interrupts are disabled while the guard is alive and the previous mask is
/// restored when it is dropped.
pub struct CriticalSection {
    was_enabled: bool,
}

impl CriticalSection {
    /// Enter a critical section by disabling interrupts.
    #[inline(always)]
    pub fn enter() -> Self {
        let was_enabled = port::interrupts_enabled();
        port::interrupts_disable();
        CriticalSection { was_enabled }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        if self.was_enabled {
            port::interrupts_enable();
        }
    }
}

/// Execute a closure with interrupts disabled.
///
/// The closure receives a reference to the critical section guard, which can
/// be used to access [`CsCell`](crate::cs_cell::CsCell) protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}
