//! Scheduler behavior: priority selection, modes, suspend/resume, delays
//! and tick processing.

// These scenarios drive wakeups through the preemptive unlock path.
#![cfg(feature = "preemption")]

mod common;

use std::ptr::NonNull;

use common::{new_buffer, read_buffer, setup, spawn, spawn_sequencer};
use monostack::kernel::{
    get_current_task, interrupt_lock, interrupt_unlock, kernel_mode, set_current_task,
    set_kernel_mode,
};
use monostack::task::{task_delay, task_resume, task_suspend, CurrentTask, Task};
use monostack::time::{get_tick, kernel_tick, time_travel};
use monostack::types::{KernelMode, TaskState, Tick};
use monostack::{kernel_start, scheduler_lock, scheduler_run, scheduler_unlock};

#[test]
fn no_task_scheduler_does_nothing() {
    let _guard = setup();
    kernel_start();
    scheduler_run();
}

#[test]
fn one_task_runs_until_it_suspends() {
    let _guard = setup();
    let out = new_buffer();
    spawn_sequencer(0, out, ["A", "B", "C"], None, 2);

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "ABCABC");
}

#[test]
fn higher_priority_runs_first() {
    let _guard = setup();
    let out = new_buffer();
    spawn_sequencer(1, out, ["A", "B", "C"], None, 2);
    spawn_sequencer(0, out, ["e", "f", "g"], None, 2);

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "ABCABCefgefg");
}

#[test]
fn two_tasks_alternate_rounds() {
    let _guard = setup();
    let out = new_buffer();
    let task1 = spawn_sequencer(1, out, ["A", "B", "C"], None, 1);
    let task2 = spawn_sequencer(0, out, ["e", "f", "g"], None, 1);

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "ABCefg");

    task_resume(task1);
    task_resume(task2);
    scheduler_run();
    assert_eq!(read_buffer(out), "ABCefgABCefg");
}

#[test]
#[should_panic(expected = "task_create(): invalid priority")]
fn create_with_invalid_priority_is_fatal() {
    let _guard = setup();
    let out = new_buffer();
    spawn_sequencer(-1, out, ["A", "", ""], None, 1);
}

#[test]
#[should_panic(expected = "task_create(): priority already in use")]
fn create_two_tasks_at_same_priority_is_fatal() {
    let _guard = setup();
    let out = new_buffer();
    spawn_sequencer(0, out, ["A", "", ""], None, 1);
    spawn_sequencer(0, out, ["B", "", ""], None, 1);
}

#[test]
fn suspended_task_is_not_scheduled() {
    let _guard = setup();
    let out = new_buffer();
    let task1 = spawn_sequencer(1, out, ["A", "B", "C"], None, 2);
    spawn_sequencer(0, out, ["e", "f", "g"], None, 2);

    task_suspend(Some(task1));

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "efgefg");
}

#[test]
#[should_panic(expected = "task_suspend(): no task is running")]
fn suspend_self_without_task_is_fatal() {
    let _guard = setup();
    task_suspend(None);
}

#[test]
fn resume_of_ready_task_changes_nothing() {
    let _guard = setup();
    let out = new_buffer();
    let task1 = spawn_sequencer(1, out, ["A", "B", "C"], None, 1);
    spawn_sequencer(0, out, ["e", "f", "g"], None, 1);

    task_resume(task1);

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "ABCefg");
}

#[test]
fn preemptive_resume_runs_higher_priority_at_once() {
    let _guard = setup();
    assert_eq!(kernel_mode(), KernelMode::Preemptive);

    let out = new_buffer();
    let high = spawn_sequencer(1, out, ["x", "", ""], None, 1);
    task_suspend(Some(high));
    spawn_sequencer(0, out, ["A", "B", ""], Some(high), 1);

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "AxB");
}

#[test]
fn cooperative_resume_defers_higher_priority() {
    let _guard = setup();
    set_kernel_mode(KernelMode::Cooperative);

    let out = new_buffer();
    let high = spawn_sequencer(1, out, ["x", "", ""], None, 1);
    task_suspend(Some(high));
    spawn_sequencer(0, out, ["A", "B", ""], Some(high), 1);

    kernel_start();
    scheduler_run();

    assert_eq!(read_buffer(out), "ABx");
}

#[test]
fn locked_scheduler_suppresses_preemption() {
    let _guard = setup();

    let out = new_buffer();
    let high = spawn_sequencer(1, out, ["e", "f", "g"], None, 1);
    task_suspend(Some(high));
    spawn_sequencer(0, out, ["A", "B", "C"], Some(high), 1);

    kernel_start();
    scheduler_lock();
    scheduler_run();
    scheduler_unlock();

    assert_eq!(read_buffer(out), "ABCefg");
}

fn record_current_task(param: *mut ()) {
    let slot = param as *mut CurrentTask;
    unsafe { *slot = get_current_task() };
    task_suspend(None);
}

#[test]
fn current_task_is_visible_inside_the_task() {
    let _guard = setup();
    let seen = common::leak(CurrentTask::None);
    let slot = seen as *mut CurrentTask;

    let task = spawn(0, record_current_task, slot as *mut ());

    kernel_start();
    scheduler_run();

    assert_eq!(unsafe { *slot }, CurrentTask::Task(task));
    assert_eq!(get_current_task(), CurrentTask::None);
}

#[test]
fn interrupt_lock_sets_the_interrupt_sentinel() {
    let _guard = setup();
    let out = new_buffer();
    let task = spawn_sequencer(0, out, ["A", "", ""], None, 1);

    set_current_task(CurrentTask::Task(task));
    assert_eq!(get_current_task(), CurrentTask::Task(task));

    let previous = interrupt_lock();
    assert_eq!(get_current_task(), CurrentTask::Interrupt);
    interrupt_unlock(previous);

    assert_eq!(get_current_task(), CurrentTask::Task(task));
    set_current_task(CurrentTask::None);
}

// ============ Delays and ticks ============

struct DelayOnce {
    out: *mut String,
    letter: &'static str,
    delay: Tick,
    phase: u8,
}

fn delay_once_task(param: *mut ()) {
    let d = unsafe { &mut *(param as *mut DelayOnce) };
    if d.phase == 0 {
        d.phase = 1;
        task_delay(d.delay);
    } else {
        unsafe { (*d.out).push_str(d.letter) };
        task_suspend(None);
    }
}

fn spawn_delay_once(priority: i8, out: *mut String, letter: &'static str, delay: Tick) -> NonNull<Task> {
    let d = common::leak(DelayOnce {
        out,
        letter,
        delay,
        phase: 0,
    });
    spawn(priority, delay_once_task, d as *mut DelayOnce as *mut ())
}

#[test]
fn tick_counts_advance() {
    let _guard = setup();
    kernel_start();

    assert_eq!(get_tick(), 0);
    kernel_tick();
    kernel_tick();
    kernel_tick();
    assert_eq!(get_tick(), 3);
}

#[test]
fn delayed_tasks_wake_in_delay_order() {
    let _guard = setup();
    let out = new_buffer();
    spawn_delay_once(2, out, "a", 3);
    spawn_delay_once(1, out, "b", 1);
    spawn_delay_once(0, out, "c", 2);

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    kernel_tick();
    assert_eq!(read_buffer(out), "b");
    kernel_tick();
    assert_eq!(read_buffer(out), "bc");
    kernel_tick();
    assert_eq!(read_buffer(out), "bca");
}

#[test]
fn zero_delay_does_not_block() {
    let _guard = setup();
    let out = new_buffer();
    spawn_delay_once(0, out, "a", 0);

    kernel_start();
    // First invocation delays zero ticks and stays ready; the second
    // appends and suspends.
    scheduler_run();
    assert_eq!(read_buffer(out), "a");
}

#[test]
fn delay_across_tick_rollover_uses_the_overflow_list() {
    let _guard = setup();
    let out = new_buffer();
    spawn_delay_once(0, out, "a", 3);

    kernel_start();
    time_travel(Tick::MAX - 1);
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    // Wake tick is (MAX-1) + 3 == 1, past the wrap.
    kernel_tick(); // tick == MAX
    assert_eq!(read_buffer(out), "");
    kernel_tick(); // tick == 0, delay lists swap
    assert_eq!(read_buffer(out), "");
    kernel_tick(); // tick == 1, wake
    assert_eq!(read_buffer(out), "a");
}

#[test]
fn resume_and_timeout_wake_exactly_once() {
    let _guard = setup();
    let out = new_buffer();
    let task = spawn_delay_once(0, out, "a", 2);

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    // Resume before the delay expires...
    task_resume(task);
    assert_eq!(read_buffer(out), "a");
    assert_eq!(unsafe { task.as_ref() }.state(), TaskState::Suspended);

    // ...then let the original wake tick pass: no second wake.
    kernel_tick();
    kernel_tick();
    assert_eq!(read_buffer(out), "a");
    assert_eq!(unsafe { task.as_ref() }.state(), TaskState::Suspended);
}

#[cfg(feature = "state-guards")]
#[test]
fn state_guards_hold() {
    let _guard = setup();
    assert!(monostack::kernel::state_check());
}

#[cfg(feature = "statistics")]
#[test]
fn run_time_is_credited_to_the_task_that_ran() {
    use monostack::port::advance_runtime;
    use monostack::task::{task_num_schedules, task_run_time};

    fn busy_task(_: *mut ()) {
        advance_runtime(100);
        task_suspend(None);
    }

    let _guard = setup();
    let task = spawn(0, busy_task, std::ptr::null_mut());

    kernel_start();
    scheduler_run();

    assert_eq!(task_run_time(task), 100);
    assert_eq!(task_num_schedules(task), 1);
}
