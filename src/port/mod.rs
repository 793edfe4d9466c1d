//! Port layer - platform-specific hooks the kernel builds on.
//!
//! The kernel needs only a handful of services from the platform: global
//! interrupt masking, an idle wait, a tick timer that calls
//! [`kernel_tick`](crate::time::kernel_tick), and (for the `statistics`
//! feature) a free-running runtime counter.
//!
//! On non-ARM targets everything is stubbed so the whole kernel runs inside
//! host tests: interrupt masking becomes a flag, and an interference hook
//! lets tests inject a "concurrent interrupt" at the deterministic points
//! where the kernel re-enables interrupts mid-scan.

#[cfg(target_arch = "arm")]
mod arm {
    use cortex_m::interrupt;
    use cortex_m::register::primask;

    /// Whether maskable interrupts are currently enabled
    #[inline(always)]
    pub fn interrupts_enabled() -> bool {
        primask::read().is_active()
    }

    /// Globally disable maskable interrupts
    #[inline(always)]
    pub fn interrupts_disable() {
        interrupt::disable();
    }

    /// Globally enable maskable interrupts
    #[inline(always)]
    pub fn interrupts_enable() {
        unsafe { interrupt::enable() };
    }

    /// Wait for the next interrupt. Used by idle loops.
    #[inline(always)]
    pub fn idle_wait_interrupt() {
        cortex_m::asm::wfi();
    }

    /// Program the SysTick timer to fire at the kernel tick rate.
    ///
    /// The SysTick handler must call [`crate::time::kernel_tick`].
    pub fn tick_timer_init(reload: u32) {
        unsafe {
            let syst = &*cortex_m::peripheral::SYST::PTR;
            syst.rvr.write(reload - 1);
            syst.cvr.write(0);
            // Core clock, exception on wrap, counter enabled
            syst.csr.write(0b111);
        }
    }

    #[allow(non_snake_case)]
    #[no_mangle]
    extern "C" fn SysTick() {
        crate::time::kernel_tick();
    }

    /// Monotonic free-running counter for the statistics feature.
    #[cfg(feature = "statistics")]
    #[inline(always)]
    pub fn system_runtime() -> u32 {
        cortex_m::peripheral::DWT::cycle_count()
    }
}

#[cfg(target_arch = "arm")]
pub use arm::*;

#[cfg(not(target_arch = "arm"))]
mod host {
    use portable_atomic::{AtomicBool, Ordering};

    static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

    /// Whether "interrupts" are currently enabled (host flag)
    #[inline(always)]
    pub fn interrupts_enabled() -> bool {
        INTERRUPTS_ENABLED.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub fn interrupts_disable() {
        INTERRUPTS_ENABLED.store(false, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn interrupts_enable() {
        INTERRUPTS_ENABLED.store(true, Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn idle_wait_interrupt() {}

    pub fn tick_timer_init(_reload: u32) {}

    #[cfg(feature = "statistics")]
    mod runtime {
        use portable_atomic::{AtomicU32, Ordering};

        static RUNTIME: AtomicU32 = AtomicU32::new(0);

        /// Monotonic counter for the statistics feature; advanced manually
        /// by the host test driving the kernel.
        #[inline(always)]
        pub fn system_runtime() -> u32 {
            RUNTIME.load(Ordering::SeqCst)
        }

        /// Advance the host runtime counter
        pub fn advance_runtime(amount: u32) {
            RUNTIME.fetch_add(amount, Ordering::SeqCst);
        }
    }

    #[cfg(feature = "statistics")]
    pub use runtime::*;
}

#[cfg(not(target_arch = "arm"))]
pub use host::*;

#[cfg(not(target_arch = "arm"))]
static INTERFERENCE_HOOK: crate::cs_cell::CsCell<Option<fn()>> =
    crate::cs_cell::CsCell::new(None);

/// Install a hook that runs at the points where the kernel re-enables
/// interrupts inside its protected list scans. Lets a host test inject a
/// deterministic concurrent access.
#[cfg(not(target_arch = "arm"))]
pub fn set_interference_hook(hook: Option<fn()>) {
    unsafe { *INTERFERENCE_HOOK.get_unchecked() = hook };
}

#[cfg(not(target_arch = "arm"))]
#[inline]
pub(crate) fn interference_point() {
    let hook = unsafe { *INTERFERENCE_HOOK.get_unchecked() };
    if let Some(hook) = hook {
        hook();
    }
}

#[cfg(target_arch = "arm")]
#[inline(always)]
pub(crate) fn interference_point() {}
