//! Global kernel state, initialization and the scheduler-lock barrier.
//!
//! The kernel state is a process-wide singleton. Atomic flags (lock depth,
//! tick counters, deferred-work markers) live in [`KernelFlags`] so they can
//! be touched from interrupts without a critical section; everything else
//! (ready table, delay lists, current task) lives in a [`CsCell`] and is
//! serialized by critical sections, the scheduler lock, or both.
//!
//! While the scheduler lock is held the current task cannot be preempted and
//! deferred work (tick processing, pending-ready promotion) accumulates; the
//! outermost unlock drains it inside a critical section.

use core::ptr::NonNull;

use crate::config::CFG_MAX_PRIORITY;
#[cfg(feature = "state-guards")]
use crate::config::CFG_GUARD_WORD;
use crate::cs_cell::CsCell;
use crate::list::List;
#[cfg(feature = "preemption")]
use crate::sched;
use crate::time;
use crate::critical::{critical_section, CriticalSection};
use crate::port;
use crate::task::{CurrentTask, Task};
use crate::types::Tick;
#[cfg(feature = "preemption")]
use crate::types::KernelMode;
#[cfg(feature = "statistics")]
use crate::types::RunTime;
#[cfg(feature = "software-timers")]
use crate::timer::TimerState;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

// ============ Atomic kernel flags ============

pub(crate) struct KernelFlags {
    sched_lock_depth: AtomicU8,
    unlock_pending: AtomicBool,
    tick: AtomicU32,
    delayed_ticks: AtomicU32,
    #[cfg(feature = "preemption")]
    higher_priority_ready: AtomicBool,
    #[cfg(feature = "preemption")]
    preemptive: AtomicBool,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            // The kernel boots with the scheduler locked; kernel_start()
            // performs the releasing unlock.
            sched_lock_depth: AtomicU8::new(1),
            unlock_pending: AtomicBool::new(false),
            tick: AtomicU32::new(0),
            delayed_ticks: AtomicU32::new(0),
            #[cfg(feature = "preemption")]
            higher_priority_ready: AtomicBool::new(false),
            #[cfg(feature = "preemption")]
            preemptive: AtomicBool::new(true),
        }
    }

    fn reset(&self) {
        self.sched_lock_depth.store(1, Ordering::SeqCst);
        self.unlock_pending.store(false, Ordering::SeqCst);
        self.tick.store(0, Ordering::SeqCst);
        self.delayed_ticks.store(0, Ordering::SeqCst);
        #[cfg(feature = "preemption")]
        {
            self.higher_priority_ready.store(false, Ordering::SeqCst);
            self.preemptive.store(true, Ordering::SeqCst);
        }
    }

    #[inline(always)]
    pub(crate) fn tick(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn set_tick(&self, tick: Tick) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn delayed_ticks(&self) -> Tick {
        self.delayed_ticks.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn delayed_tick_increment(&self) {
        self.delayed_ticks.fetch_add(1, Ordering::SeqCst);
    }

    /// Move one deferred tick into the tick counter
    #[inline(always)]
    fn consume_delayed_tick(&self) {
        self.delayed_ticks.fetch_sub(1, Ordering::SeqCst);
        self.tick.fetch_add(1, Ordering::SeqCst);
    }

    #[inline(always)]
    fn depth(&self) -> u8 {
        self.sched_lock_depth.load(Ordering::SeqCst)
    }

    #[inline(always)]
    fn lock(&self) {
        self.sched_lock_depth.fetch_add(1, Ordering::SeqCst);
    }

    #[inline(always)]
    fn unlock(&self) {
        self.sched_lock_depth.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn unlock_pending(&self) -> bool {
        self.unlock_pending.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn set_unlock_pending(&self) {
        self.unlock_pending.store(true, Ordering::SeqCst);
    }

    #[inline(always)]
    fn clear_unlock_pending(&self) {
        self.unlock_pending.store(false, Ordering::SeqCst);
    }

    #[cfg(feature = "preemption")]
    #[inline(always)]
    pub(crate) fn raise_higher_ready(&self) {
        self.higher_priority_ready.store(true, Ordering::SeqCst);
    }

    #[cfg(feature = "preemption")]
    #[inline(always)]
    fn higher_ready(&self) -> bool {
        self.higher_priority_ready.load(Ordering::SeqCst)
    }

    #[cfg(feature = "preemption")]
    #[inline(always)]
    fn clear_higher_ready(&self) {
        self.higher_priority_ready.store(false, Ordering::SeqCst);
    }

    #[cfg(feature = "preemption")]
    #[inline(always)]
    pub(crate) fn is_preemptive(&self) -> bool {
        self.preemptive.load(Ordering::SeqCst)
    }

    #[cfg(feature = "preemption")]
    #[inline(always)]
    fn set_preemptive(&self, preemptive: bool) {
        self.preemptive.store(preemptive, Ordering::SeqCst);
    }
}

pub(crate) static FLAGS: KernelFlags = KernelFlags::new();

// ============ Serialized kernel state ============

#[cfg(feature = "statistics")]
pub(crate) struct KernelStats {
    pub(crate) total_run_time: RunTime,
    pub(crate) no_task_run_time: RunTime,
}

pub(crate) struct KernelState {
    #[cfg(feature = "state-guards")]
    guard_start: u32,

    pub(crate) current_task: CurrentTask,
    pub(crate) ready: [Option<NonNull<Task>>; CFG_MAX_PRIORITY],

    // Two delay lists; `delay_swapped` selects which one is "current".
    // Swapping on tick rollover replaces the C pointer-exchange.
    delay_lists: [List<Task>; 2],
    delay_swapped: bool,

    pub(crate) pending_ready: List<Task>,

    #[cfg(feature = "software-timers")]
    pub(crate) timer: TimerState,

    #[cfg(feature = "statistics")]
    pub(crate) stats: KernelStats,

    #[cfg(feature = "state-guards")]
    guard_end: u32,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            #[cfg(feature = "state-guards")]
            guard_start: CFG_GUARD_WORD,
            current_task: CurrentTask::None,
            ready: [None; CFG_MAX_PRIORITY],
            delay_lists: [List::new(), List::new()],
            delay_swapped: false,
            pending_ready: List::new(),
            #[cfg(feature = "software-timers")]
            timer: TimerState::new(),
            #[cfg(feature = "statistics")]
            stats: KernelStats {
                total_run_time: 0,
                no_task_run_time: 0,
            },
            #[cfg(feature = "state-guards")]
            guard_end: CFG_GUARD_WORD,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Delay list for wake ticks that do not cross the tick-counter wrap
    #[inline(always)]
    pub(crate) fn delay_list_current(&mut self) -> &mut List<Task> {
        &mut self.delay_lists[self.delay_swapped as usize]
    }

    /// Delay list for wake ticks past the tick-counter wrap
    #[inline(always)]
    pub(crate) fn delay_list_overflow(&mut self) -> &mut List<Task> {
        &mut self.delay_lists[!self.delay_swapped as usize]
    }

    /// Exchange the two delay lists. Called exactly once per tick rollover.
    #[inline(always)]
    pub(crate) fn swap_delay_lists(&mut self) {
        self.delay_swapped = !self.delay_swapped;
    }
}

pub(crate) static STATE: CsCell<KernelState> = CsCell::new(KernelState::new());

// ============ Public API ============

/// Initialize the kernel. Must be called before any other kernel function.
///
/// Reinitialization is only valid when no task exists; the kernel drops all
/// bookkeeping without unwinding task or primitive state.
pub fn kernel_init() {
    FLAGS.reset();
    critical_section(|cs| {
        STATE.get(cs).reset();
    });
}

/// Release the boot-time scheduler lock and enable interrupts.
///
/// After this call the application drives the kernel from its main loop:
///
/// ```ignore
/// kernel_init();
/// // create tasks...
/// kernel_start();
/// loop {
///     scheduler_run();
///     port::idle_wait_interrupt();
/// }
/// ```
pub fn kernel_start() {
    port::interrupts_enable();
    scheduler_unlock();
}

/// Lock the scheduler (recursive). While locked the current task cannot be
/// preempted and deferred work accumulates.
#[inline]
pub fn scheduler_lock() {
    FLAGS.lock();
}

/// Unlock the scheduler (recursive). The outermost unlock drains deferred
/// ticks and pending-ready wakeups, and, in preemptive mode, runs the
/// scheduler once if a higher-priority task became ready.
pub fn scheduler_unlock() {
    if FLAGS.unlock_pending() && FLAGS.depth() == 1 {
        let _cs = CriticalSection::enter();

        loop {
            FLAGS.clear_unlock_pending();

            while FLAGS.delayed_ticks() != 0 {
                FLAGS.consume_delayed_tick();

                port::interrupts_enable();
                unsafe { time::process_tick() };
                port::interrupts_disable();
            }

            port::interrupts_enable();
            unsafe { time::drain_pending_ready() };
            port::interrupts_disable();

            #[cfg(feature = "preemption")]
            if FLAGS.is_preemptive() && FLAGS.higher_ready() {
                FLAGS.clear_higher_ready();
                port::interrupts_enable();
                unsafe { sched::schedule_highest() };
                port::interrupts_disable();
            }

            if !FLAGS.unlock_pending() {
                break;
            }
        }

        FLAGS.unlock();
    } else {
        FLAGS.unlock();
    }
}

/// Get the task currently being executed, or the no-task/interrupt sentinel.
pub fn get_current_task() -> CurrentTask {
    critical_section(|cs| STATE.get(cs).current_task)
}

/// Overwrite the current-task marker. Plumbing for ports and test harnesses;
/// normal scheduling maintains this itself.
pub fn set_current_task(task: CurrentTask) {
    critical_section(|cs| STATE.get(cs).current_task = task);
}

/// Enter interrupt context: locks the scheduler and marks the current task
/// as [`CurrentTask::Interrupt`] so primitives can tell they are called from
/// an ISR. Returns the previous marker, to be passed to
/// [`interrupt_unlock`].
pub fn interrupt_lock() -> CurrentTask {
    scheduler_lock();
    critical_section(|cs| {
        let state = STATE.get(cs);
        let previous = state.current_task;
        state.current_task = CurrentTask::Interrupt;
        previous
    })
}

/// Leave interrupt context and run any scheduling work the ISR deferred.
pub fn interrupt_unlock(previous: CurrentTask) {
    critical_section(|cs| STATE.get(cs).current_task = previous);
    scheduler_unlock();
}

/// Select cooperative or preemptive scheduling at runtime.
#[cfg(feature = "preemption")]
pub fn set_kernel_mode(mode: KernelMode) {
    FLAGS.set_preemptive(mode == KernelMode::Preemptive);
}

/// Current scheduling mode.
#[cfg(feature = "preemption")]
pub fn kernel_mode() -> KernelMode {
    if FLAGS.is_preemptive() {
        KernelMode::Preemptive
    } else {
        KernelMode::Cooperative
    }
}

/// Check the sentinel words around the kernel state. Returns `false` if a
/// rogue writer clobbered either end.
#[cfg(feature = "state-guards")]
pub fn state_check() -> bool {
    critical_section(|cs| {
        let state = STATE.get(cs);
        state.guard_start == CFG_GUARD_WORD && state.guard_end == CFG_GUARD_WORD
    })
}

/// Total runtime counted by the statistics clock.
#[cfg(feature = "statistics")]
pub fn total_run_time() -> RunTime {
    critical_section(|cs| STATE.get(cs).stats.total_run_time)
}

/// Runtime spent with no task executing.
#[cfg(feature = "statistics")]
pub fn no_task_run_time() -> RunTime {
    critical_section(|cs| STATE.get(cs).stats.no_task_run_time)
}
