//! Shared harness for the kernel integration tests.
//!
//! The kernel state is a process-wide singleton, so tests serialize on a
//! mutex and reinitialize the kernel in `setup()`. Task and primitive
//! storage is leaked to satisfy the kernel's `'static` ownership contract;
//! each test leaks a handful of small records, which is fine for a test
//! process.

#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard};

use monostack::task::{task_create, task_resume, task_suspend, Task};
use monostack::types::{Priority, TaskFunction};

static KERNEL_GUARD: Mutex<()> = Mutex::new(());

/// Serialize on the kernel singleton and reinitialize it.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = KERNEL_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    monostack::port::set_interference_hook(None);
    monostack::kernel_init();
    guard
}

pub fn leak<T>(value: T) -> &'static mut T {
    Box::leak(Box::new(value))
}

/// Create a task backed by leaked storage and return a handle to it.
pub fn spawn(priority: Priority, function: TaskFunction, parameter: *mut ()) -> NonNull<Task> {
    let task = leak(Task::new());
    let handle = NonNull::from(&mut *task);
    task_create(task, priority, function, parameter);
    handle
}

/// Leaked output string shared between tasks and the test body.
pub fn new_buffer() -> *mut String {
    Box::into_raw(Box::new(String::new()))
}

pub fn read_buffer(out: *mut String) -> String {
    unsafe { (*out).clone() }
}

/// Scripted task: per invocation appends `first`, optionally resumes
/// another task, appends `second` and `third`, and suspends itself once
/// `remaining` invocations are used up.
pub struct Sequencer {
    pub out: *mut String,
    pub first: &'static str,
    pub second: &'static str,
    pub third: &'static str,
    pub resume: Option<NonNull<Task>>,
    pub remaining: u32,
}

pub fn sequencing_task(param: *mut ()) {
    let seq = unsafe { &mut *(param as *mut Sequencer) };
    let out = unsafe { &mut *seq.out };

    out.push_str(seq.first);
    if let Some(task) = seq.resume {
        task_resume(task);
    }
    out.push_str(seq.second);
    out.push_str(seq.third);

    if seq.remaining > 0 {
        seq.remaining -= 1;
    }
    if seq.remaining == 0 {
        task_suspend(None);
    }
}

/// Create a sequencing task.
pub fn spawn_sequencer(
    priority: Priority,
    out: *mut String,
    letters: [&'static str; 3],
    resume: Option<NonNull<Task>>,
    remaining: u32,
) -> NonNull<Task> {
    let seq = leak(Sequencer {
        out,
        first: letters[0],
        second: letters[1],
        third: letters[2],
        resume,
        remaining,
    });
    spawn(priority, sequencing_task, seq as *mut Sequencer as *mut ())
}
