//! Software timers.
//!
//! Timers are drained by a dedicated kernel task. Newly started or reset
//! timers land in an unordered list; the timer task moves them into a list
//! ordered by absolute wake tick, executes whatever is due, and then delays
//! itself until the next wake tick. A cursor into the ordered list survives
//! tick-counter wrap: when the counter rolls over the task rewinds the
//! cursor to the list head and runs again.

use crate::kernel::{scheduler_lock, scheduler_unlock, FLAGS, STATE};
use crate::list::{List, Node};
use crate::task::{task_create_raw, task_delay, task_resume, Task};
use crate::time::get_tick;
use crate::critical::CriticalSection;
use crate::port;
use crate::types::{DiffTick, Priority, TaskParameter, Tick, MAX_DELAY};
use core::ptr::NonNull;

/// Timer behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    /// Runs once, `period` ticks after a start or reset
    OneShot,
    /// Runs every `period` ticks until stopped; re-queues itself when run
    Auto,
    /// Runs once, as soon as the timer task is scheduled; the period is
    /// ignored
    NoPeriod,
}

/// Timer callback. Receives the timer itself, so the callback can reset or
/// stop it.
pub type TimerFunction = fn(NonNull<Timer>, *mut ());

fn timer_function_unset(_: NonNull<Timer>, _: *mut ()) {}

/// Software timer. Embed in application-owned `static` storage and
/// register with [`timer_init`].
pub struct Timer {
    pub(crate) ttype: TimerType,
    pub(crate) period: Tick,
    pub(crate) function: TimerFunction,
    pub(crate) parameter: *mut (),
    pub(crate) node: Node<Timer>,
}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            ttype: TimerType::OneShot,
            period: 0,
            function: timer_function_unset,
            parameter: core::ptr::null_mut(),
            node: Node::new(),
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

// Timers are linked and unlinked from task and interrupt context under the
// critical-section contract.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

/// Timer bookkeeping embedded in the kernel state.
pub(crate) struct TimerState {
    pub(crate) task: Task,
    ordered: List<Timer>,
    unordered: List<Timer>,
    index: Option<NonNull<Node<Timer>>>,
    last_run: Tick,
}

impl TimerState {
    pub(crate) const fn new() -> Self {
        TimerState {
            task: Task::new(),
            ordered: List::new(),
            unordered: List::new(),
            index: None,
            last_run: 0,
        }
    }
}

/// Create the timer task at the given priority. Must be called before any
/// timer is started.
pub fn timer_task_create(priority: Priority) {
    let task = unsafe { NonNull::new_unchecked(&raw mut (*STATE.as_ptr()).timer.task) };
    unsafe { task_create_raw(task, priority, timer_task_function, core::ptr::null_mut()) };
}

/// Initialize a timer. Does not start it.
pub fn timer_init(
    timer: &'static mut Timer,
    ttype: TimerType,
    period: Tick,
    function: TimerFunction,
    parameter: *mut (),
) {
    let owner = NonNull::from(&mut *timer);
    timer.ttype = ttype;
    timer.period = period;
    timer.function = function;
    timer.parameter = parameter;
    timer.node.init(owner);
}

/// Start the timer: reset it only if it is not already running.
pub fn timer_start(timer: NonNull<Timer>) {
    if !timer_is_running(timer) {
        timer_reset(timer);
    }
}

/// (Re)arm the timer: it runs `period` ticks from now (immediately for
/// no-period timers), wherever it was before.
pub fn timer_reset(timer: NonNull<Timer>) {
    {
        let _cs = CriticalSection::enter();
        let state = unsafe { STATE.get_unchecked() };
        let timer_ref = unsafe { &mut *timer.as_ptr() };
        let node = NonNull::from(&mut timer_ref.node);

        if timer_ref.node.is_linked() {
            if state.timer.index == Some(node) {
                state.timer.index = unsafe { node.as_ref() }.next();
            }
            unsafe { List::unlink(node) };
        }

        unsafe { state.timer.unordered.insert_first(node) };
    }

    let task = unsafe { NonNull::new_unchecked(&raw mut (*STATE.as_ptr()).timer.task) };
    task_resume(task);
}

/// Stop the timer. It will not run again until started or reset.
pub fn timer_stop(timer: NonNull<Timer>) {
    let _cs = CriticalSection::enter();
    let state = unsafe { STATE.get_unchecked() };
    let timer_ref = unsafe { &mut *timer.as_ptr() };
    let node = NonNull::from(&mut timer_ref.node);

    if timer_ref.node.is_linked() {
        if state.timer.index == Some(node) {
            state.timer.index = unsafe { node.as_ref() }.next();
        }
        unsafe { List::unlink(node) };
    }
}

/// Whether the timer has been started or reset and has not yet stopped.
pub fn timer_is_running(timer: NonNull<Timer>) -> bool {
    let _cs = CriticalSection::enter();
    unsafe { timer.as_ref() }.node.is_linked()
}

fn timer_execute(timer: NonNull<Timer>) {
    port::interrupts_disable();
    let function = unsafe { timer.as_ref() }.function;
    let parameter = unsafe { timer.as_ref() }.parameter;
    port::interrupts_enable();

    function(timer, parameter);
}

/// Move a timer from the unordered list into its wake-tick position in the
/// ordered list, tolerating concurrent resets/stops from interrupts while
/// the scan runs with interrupts enabled.
///
/// # Safety
/// Called by the timer task with interrupts enabled.
unsafe fn insert_in_ordered_list(timer: NonNull<Timer>, wake: Tick) {
    let ts = unsafe { &mut (*STATE.as_ptr()).timer };
    let timer_ref = unsafe { &mut *timer.as_ptr() };
    let node = NonNull::from(&mut timer_ref.node);

    port::interrupts_disable();

    let pos = loop {
        // The ordered prefix up to the cursor already ran this pass; a
        // wake past last_run can start the walk at the cursor.
        let mut pos = if wake > ts.last_run {
            ts.index
        } else {
            ts.ordered.head()
        };

        while let Some(p) = pos {
            port::interrupts_enable();
            port::interference_point();

            if unsafe { p.as_ref() }.value() >= wake {
                port::interrupts_disable();
                break;
            }

            port::interrupts_disable();
            if !unsafe { p.as_ref() }.is_in(&ts.ordered) {
                // An interrupt reset or stopped this candidate.
                break;
            }

            pos = unsafe { p.as_ref() }.next();
        }

        let pos_vanished = match pos {
            Some(p) => !unsafe { p.as_ref() }.is_in(&ts.ordered),
            None => false,
        };
        if pos_vanished && unsafe { node.as_ref() }.is_in(&ts.unordered) {
            continue;
        }
        break pos;
    };

    if unsafe { node.as_ref() }.is_in(&ts.unordered) {
        unsafe {
            List::unlink(node);
            ts.ordered.insert_before(pos, node);
            (*node.as_ptr()).set_value(wake);
        }

        // If the timer landed directly before the cursor and is due this
        // pass's future, pull the cursor back so it runs without waiting a
        // full wrap.
        let index_prev = match ts.index {
            Some(index) => unsafe { index.as_ref() }.prev(),
            None => ts.ordered.tail(),
        };
        if wake > ts.last_run && index_prev == Some(node) {
            ts.index = Some(node);
        }
    }

    port::interrupts_enable();
}

/// Timer task: drains the unordered list, executes due timers from the
/// ordered list, then sleeps until the next wake tick.
fn timer_task_function(_: TaskParameter) {
    let ts = unsafe { &mut (*STATE.as_ptr()).timer };

    let change_index = {
        let now = get_tick();
        if now >= ts.last_run {
            ts.last_run = now;
            false
        } else {
            // The tick counter wrapped since the last pass. Finish this
            // pass against the old epoch, then rewind the cursor.
            ts.last_run = MAX_DELAY;
            true
        }
    };

    port::interrupts_disable();

    // Queue new timers; no-period timers execute right away.
    loop {
        let node = match ts.unordered.head() {
            Some(node) => node,
            None => break,
        };
        let timer = unsafe { node.as_ref() }.owner().unwrap();

        if unsafe { timer.as_ref() }.ttype == TimerType::NoPeriod {
            unsafe { List::unlink(node) };
            port::interrupts_enable();
            timer_execute(timer);
        } else {
            port::interrupts_enable();
            let wake = ts.last_run.wrapping_add(unsafe { timer.as_ref() }.period);
            unsafe { insert_in_ordered_list(timer, wake) };
        }
        port::interrupts_disable();
    }

    port::interrupts_enable();

    // Execute every timer due up to last_run.
    loop {
        let index = match ts.index {
            Some(index) => index,
            None => break,
        };
        if unsafe { index.as_ref() }.value() > ts.last_run {
            break;
        }

        let timer = unsafe { index.as_ref() }.owner().unwrap();
        ts.index = unsafe { index.as_ref() }.next();

        if unsafe { timer.as_ref() }.ttype == TimerType::Auto {
            timer_reset(timer);
        } else {
            port::interrupts_disable();
            unsafe { List::unlink(index) };
            port::interrupts_enable();
        }

        timer_execute(timer);
    }

    port::interrupts_disable();

    if change_index {
        // Wrapped: rewind and run again immediately.
        port::interrupts_enable();
        ts.index = ts.ordered.head();
        ts.last_run = 0;
    } else if ts.unordered.is_empty()
        && (ts.index.is_none()
            || unsafe { ts.index.unwrap().as_ref() }.value() > FLAGS.tick())
    {
        // Nothing ready: sleep until the next ordered entry, or forever.
        scheduler_lock();

        let ticks_to_sleep;
        if let Some(index) = ts.index {
            ticks_to_sleep = unsafe { index.as_ref() }.value().wrapping_sub(ts.last_run);
            port::interrupts_enable();
        } else if let Some(head) = ts.ordered.head() {
            ticks_to_sleep = unsafe { head.as_ref() }.value().wrapping_sub(FLAGS.tick());
            port::interrupts_enable();
        } else {
            ticks_to_sleep = MAX_DELAY;
            task_delay(MAX_DELAY);
        }

        if ticks_to_sleep as DiffTick > 0 {
            // Delay only if the wake tick is not already in the past.
            task_delay(ticks_to_sleep);
        }

        scheduler_unlock();
    } else {
        // A timer is already due; run again without sleeping.
        port::interrupts_enable();
    }
}
