//! Synchronization primitives: semaphore, mutex (incl. priority
//! inheritance), item queue and byte FIFO, and the interrupt-tolerant
//! event-list insertion.

// These scenarios drive wakeups through the preemptive unlock path.
#![cfg(feature = "preemption")]

mod common;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use common::{leak, new_buffer, read_buffer, setup, spawn};
use monostack::error::KernelError;
use monostack::kernel::{get_current_task, set_current_task};
use monostack::task::{task_priority, task_resume, task_suspend, CurrentTask, Task};
use monostack::time::kernel_tick;
use monostack::types::{TaskState, MAX_DELAY};
use monostack::{kernel_start, scheduler_run, Fifo, Mutex, Queue, Semaphore};

// ============ Semaphore ============

#[test]
fn semaphore_take_and_give_track_the_count() {
    let _guard = setup();
    let sem = Semaphore::new(0, 2);

    assert_eq!(sem.take(), Err(KernelError::NotAvailable));
    assert_eq!(sem.give(), Ok(()));
    assert_eq!(sem.give(), Ok(()));
    assert_eq!(sem.get_count(), 2);

    // Giving a saturated semaphore fails and leaves the count alone.
    assert_eq!(sem.give(), Err(KernelError::Overflow));
    assert_eq!(sem.get_count(), 2);

    assert_eq!(sem.take(), Ok(()));
    assert_eq!(sem.take(), Ok(()));
    assert_eq!(sem.take(), Err(KernelError::NotAvailable));
    assert_eq!(sem.get_max(), 2);
}

#[test]
fn semaphore_constructors() {
    let _guard = setup();
    assert_eq!(Semaphore::new_locked(3).get_count(), 0);
    assert_eq!(Semaphore::new_unlocked(3).get_count(), 3);
}

#[test]
#[should_panic(expected = "semaphore_init(): count exceeds max")]
fn semaphore_init_above_max_is_fatal() {
    let _guard = setup();
    let sem = Semaphore::new(0, 1);
    sem.init(3, 2);
}

struct SemWaiter {
    sem: *const Semaphore,
    out: *mut String,
    letter: &'static str,
}

fn sem_waiter_task(param: *mut ()) {
    let w = unsafe { &*(param as *const SemWaiter) };
    let sem = unsafe { &*w.sem };
    if sem.take_pend(MAX_DELAY).is_ok() {
        unsafe { (*w.out).push_str(w.letter) };
        task_suspend(None);
    }
}

#[test]
fn semaphore_wakes_waiters_in_priority_order() {
    let _guard = setup();
    let out = new_buffer();
    let sem: &'static Semaphore = leak(Semaphore::new_locked(2));

    let low = leak(SemWaiter {
        sem,
        out,
        letter: "L",
    });
    let high = leak(SemWaiter {
        sem,
        out,
        letter: "H",
    });
    spawn(0, sem_waiter_task, low as *mut SemWaiter as *mut ());
    spawn(1, sem_waiter_task, high as *mut SemWaiter as *mut ());

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    // Each give wakes exactly one waiter, highest priority first.
    sem.give().unwrap();
    assert_eq!(read_buffer(out), "H");
    sem.give().unwrap();
    assert_eq!(read_buffer(out), "HL");
    assert_eq!(sem.get_count(), 0);
}

struct TimeoutProbe {
    sem: *const Semaphore,
    out: *mut String,
}

fn timeout_probe_task(param: *mut ()) {
    let p = unsafe { &*(param as *const TimeoutProbe) };
    let sem = unsafe { &*p.sem };
    if sem.take_pend(2).is_ok() {
        unsafe { (*p.out).push_str("T") };
        task_suspend(None);
    } else {
        unsafe { (*p.out).push_str("p") };
    }
}

#[test]
fn semaphore_pend_times_out_and_retries() {
    let _guard = setup();
    let out = new_buffer();
    let sem: &'static Semaphore = leak(Semaphore::new_locked(1));
    let probe = leak(TimeoutProbe { sem, out });
    spawn(0, timeout_probe_task, probe as *mut TimeoutProbe as *mut ());

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "p");

    // The timeout wakes the task; it pends again.
    kernel_tick();
    kernel_tick();
    assert_eq!(read_buffer(out), "pp");

    // A give finally satisfies it.
    sem.give().unwrap();
    assert_eq!(read_buffer(out), "ppT");
}

// ============ Mutex ============

#[test]
fn mutex_lock_is_recursive_for_the_owner() {
    let _guard = setup();
    let out = new_buffer();
    let task = common::spawn_sequencer(0, out, ["", "", ""], None, 1);
    let mutex = Mutex::new();

    set_current_task(CurrentTask::Task(task));
    assert_eq!(mutex.lock(), Ok(()));
    assert_eq!(mutex.lock(), Ok(()));
    assert_eq!(mutex.lock(), Ok(()));
    assert_eq!(mutex.get_count(), 3);
    assert_eq!(mutex.get_owner(), CurrentTask::Task(task));

    mutex.unlock();
    mutex.unlock();
    assert_eq!(mutex.get_count(), 1);
    mutex.unlock();
    assert_eq!(mutex.get_count(), 0);
    assert_eq!(mutex.get_owner(), CurrentTask::None);
    set_current_task(CurrentTask::None);
}

#[test]
#[should_panic(expected = "mutex_unlock(): mutex already unlocked")]
fn mutex_double_unlock_is_fatal() {
    let _guard = setup();
    let mutex = Mutex::new();
    assert_eq!(mutex.lock(), Ok(()));
    mutex.unlock();
    mutex.unlock();
}

#[test]
fn mutex_lock_fails_for_non_owners() {
    let _guard = setup();
    let out = new_buffer();
    let owner = common::spawn_sequencer(0, out, ["", "", ""], None, 1);
    let other = common::spawn_sequencer(1, out, ["", "", ""], None, 1);
    let mutex = Mutex::new();

    set_current_task(CurrentTask::Task(owner));
    assert_eq!(mutex.lock(), Ok(()));
    assert!(!mutex.is_locked());

    set_current_task(CurrentTask::Task(other));
    assert_eq!(mutex.lock(), Err(KernelError::NotAvailable));
    assert!(mutex.is_locked());

    set_current_task(CurrentTask::None);
}

struct MutexHolder {
    mutex: *const Mutex,
    out: *mut String,
}

fn mutex_holder_task(param: *mut ()) {
    let h = unsafe { &*(param as *const MutexHolder) };
    unsafe { (*h.out).push_str("L") };
    unsafe { &*h.mutex }.unlock();
    unsafe { (*h.out).push_str("l") };
    task_suspend(None);
}

fn mutex_taker_task(param: *mut ()) {
    let t = unsafe { &*(param as *const MutexHolder) };
    if unsafe { &*t.mutex }.lock_pend(MAX_DELAY).is_ok() {
        unsafe { (*t.out).push_str("H") };
        unsafe { &*t.mutex }.unlock();
        task_suspend(None);
    }
}

#[cfg(feature = "priority-inheritance")]
#[test]
fn mutex_priority_inheritance_boosts_and_restores_the_owner() {
    let _guard = setup();
    let out = new_buffer();
    let mutex: &'static Mutex = leak(Mutex::new());

    let holder = leak(MutexHolder { mutex, out });
    let taker = leak(MutexHolder { mutex, out });
    let low = spawn(0, mutex_holder_task, holder as *mut MutexHolder as *mut ());
    common::spawn_sequencer(1, out, ["M", "", ""], None, 1);
    let high = spawn(2, mutex_taker_task, taker as *mut MutexHolder as *mut ());

    // The low task takes the mutex; the high task blocks on it and lends
    // its priority to the owner.
    set_current_task(CurrentTask::Task(low));
    mutex.lock().unwrap();
    set_current_task(CurrentTask::Task(high));
    mutex.pend(MAX_DELAY);
    set_current_task(CurrentTask::None);

    assert_eq!(task_priority(low), 2);
    assert_eq!(unsafe { high.as_ref() }.state(), TaskState::Suspended);

    kernel_start();
    scheduler_run();

    // Boosted L runs before M, releases (restoring its priority), H takes
    // over, then M, then L finishes at its original priority.
    assert_eq!(read_buffer(out), "LHMl");
    assert_eq!(task_priority(low), 0);
    assert_eq!(mutex.get_owner(), CurrentTask::None);
}

#[test]
fn mutex_unlock_wakes_the_highest_priority_waiter() {
    let _guard = setup();
    let out = new_buffer();
    let mutex: &'static Mutex = leak(Mutex::new());

    let taker_low = leak(MutexHolder { mutex, out });
    let taker_high = leak(MutexHolder { mutex, out });
    let low = spawn(0, mutex_taker_task, taker_low as *mut MutexHolder as *mut ());
    let high = spawn(1, mutex_taker_task, taker_high as *mut MutexHolder as *mut ());
    let _ = low;
    let _ = high;

    // Main context owns the mutex; both tasks block on it.
    assert_eq!(mutex.lock(), Ok(()));
    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    // Releasing hands the mutex to the waiters, highest priority first;
    // each taker appends "H" when it finally gets the lock.
    mutex.unlock();
    assert_eq!(read_buffer(out), "HH");
    assert_eq!(mutex.get_owner(), CurrentTask::None);
}

// ============ Queue ============

#[test]
fn queue_round_trip_with_wraparound() {
    let _guard = setup();
    let queue = Queue::new();
    queue.init(leak([0u8; 2]), 1);

    let mut item = [0u8; 1];

    queue.write(&[0xA]).unwrap();
    queue.write(&[0xB]).unwrap();
    assert_eq!(queue.write(&[0xF]), Err(KernelError::QueueFull));

    queue.read(&mut item).unwrap();
    assert_eq!(item[0], 0xA);

    queue.write(&[0xC]).unwrap();

    queue.read(&mut item).unwrap();
    assert_eq!(item[0], 0xB);
    queue.read(&mut item).unwrap();
    assert_eq!(item[0], 0xC);

    assert_eq!(queue.read(&mut item), Err(KernelError::QueueEmpty));
    assert_eq!(queue.get_length(), 2);
    assert!(queue.is_empty());
}

#[test]
fn queue_counters_balance() {
    let _guard = setup();
    let queue = Queue::new();
    queue.init(leak([0u8; 12]), 4);

    assert_eq!(queue.get_item_size(), 4);
    assert_eq!(queue.get_length(), 3);
    assert_eq!(queue.get_free(), 3);

    queue.write(&[1, 2, 3, 4]).unwrap();
    assert_eq!(queue.get_used(), 1);
    assert_eq!(queue.get_free(), 2);
    assert_eq!(queue.get_length(), 3);
}

#[test]
#[should_panic(expected = "queue_write(): wrong item size")]
fn queue_write_with_wrong_item_size_is_fatal() {
    let _guard = setup();
    let queue = Queue::new();
    queue.init(leak([0u8; 4]), 2);
    let _ = queue.write(&[1, 2, 3]);
}

struct QueueConsumer {
    queue: *const Queue,
    out: *mut String,
}

fn queue_consumer_task(param: *mut ()) {
    let c = unsafe { &*(param as *const QueueConsumer) };
    let queue = unsafe { &*c.queue };
    let mut item = [0u8; 1];
    if queue.read_pend(&mut item, MAX_DELAY).is_ok() {
        unsafe { (*c.out).push(item[0] as char) };
        task_suspend(None);
    }
}

#[test]
fn queue_write_wakes_a_pending_reader() {
    let _guard = setup();
    let out = new_buffer();
    let queue: &'static Queue = leak(Queue::new());
    queue.init(leak([0u8; 2]), 1);

    let consumer = leak(QueueConsumer { queue, out });
    spawn(0, queue_consumer_task, consumer as *mut QueueConsumer as *mut ());

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    queue.write(b"x").unwrap();
    assert_eq!(read_buffer(out), "x");
}

struct QueueProducer {
    queue: *const Queue,
    out: *mut String,
}

fn queue_producer_task(param: *mut ()) {
    let p = unsafe { &*(param as *const QueueProducer) };
    let queue = unsafe { &*p.queue };
    if queue.write_pend(b"y", MAX_DELAY).is_ok() {
        unsafe { (*p.out).push('w') };
        task_suspend(None);
    }
}

#[test]
fn queue_read_wakes_a_pending_writer() {
    let _guard = setup();
    let out = new_buffer();
    let queue: &'static Queue = leak(Queue::new());
    queue.init(leak([0u8; 1]), 1);
    queue.write(b"x").unwrap();

    let producer = leak(QueueProducer { queue, out });
    spawn(0, queue_producer_task, producer as *mut QueueProducer as *mut ());

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    let mut item = [0u8; 1];
    queue.read(&mut item).unwrap();
    assert_eq!(read_buffer(out), "w");
    assert_eq!(queue.get_used(), 1);
}

// ============ FIFO ============

#[test]
fn fifo_byte_round_trip() {
    let _guard = setup();
    let fifo = Fifo::new();
    fifo.init(leak([0u8; 2]));

    assert_eq!(fifo.read_byte(), None);
    fifo.write_byte(1).unwrap();
    fifo.write_byte(2).unwrap();
    assert_eq!(fifo.write_byte(3), Err(KernelError::QueueFull));

    assert_eq!(fifo.read_byte(), Some(1));
    assert_eq!(fifo.read_byte(), Some(2));
    assert_eq!(fifo.read_byte(), None);
}

#[test]
fn fifo_block_transfers_wrap_the_ring() {
    let _guard = setup();
    let fifo = Fifo::new();
    fifo.init(leak([0u8; 4]));

    assert_eq!(fifo.write(&[1, 2, 3]), 3);

    let mut buff = [0u8; 8];
    assert_eq!(fifo.read(&mut buff[..2]), 2);
    assert_eq!(&buff[..2], &[1, 2]);

    // This write wraps around the end of the ring.
    assert_eq!(fifo.write(&[4, 5]), 2);
    assert_eq!(fifo.get_used(), 3);

    assert_eq!(fifo.read(&mut buff), 3);
    assert_eq!(&buff[..3], &[3, 4, 5]);
    assert_eq!(fifo.get_free(), 4);
}

#[test]
fn fifo_partial_reads_and_writes() {
    let _guard = setup();
    let fifo = Fifo::new();
    fifo.init(leak([0u8; 4]));

    assert_eq!(fifo.write(&[9, 8]), 2);
    // Only two bytes available.
    let mut buff = [0u8; 5];
    assert_eq!(fifo.read(&mut buff), 2);

    // Only four bytes of space.
    assert_eq!(fifo.write(&[1, 2, 3, 4, 5, 6]), 4);
    assert_eq!(fifo.get_free(), 0);
    assert!(fifo.is_full());
}

struct FifoConsumer {
    fifo: *const Fifo,
    out: *mut String,
    wakeups: u32,
}

fn fifo_consumer_task(param: *mut ()) {
    let c = unsafe { &mut *(param as *mut FifoConsumer) };
    let fifo = unsafe { &*c.fifo };
    let mut buff = [0u8; 5];
    let n = fifo.read_pend(&mut buff, MAX_DELAY);
    if n > 0 {
        c.wakeups += 1;
        for byte in &buff[..n as usize] {
            unsafe { (*c.out).push((b'0' + byte) as char) };
        }
        task_suspend(None);
    }
}

#[test]
fn fifo_waiter_sleeps_until_its_full_request_is_available() {
    let _guard = setup();
    let out = new_buffer();
    let fifo: &'static Fifo = leak(Fifo::new());
    fifo.init(leak([0u8; 8]));

    let consumer = leak(FifoConsumer {
        fifo,
        out,
        wakeups: 0,
    });
    let consumer_ptr = consumer as *mut FifoConsumer;
    spawn(1, fifo_consumer_task, consumer_ptr as *mut ());

    kernel_start();
    scheduler_run();
    assert_eq!(read_buffer(out), "");

    // Three bytes are not enough for a five-byte request.
    assert_eq!(fifo.write(&[1, 2, 3]), 3);
    scheduler_run();
    assert_eq!(read_buffer(out), "");
    assert_eq!(unsafe { (*consumer_ptr).wakeups }, 0);

    // Two more complete the request: the consumer wakes exactly once and
    // receives all five bytes.
    assert_eq!(fifo.write(&[4, 5]), 2);
    assert_eq!(read_buffer(out), "12345");
    assert_eq!(unsafe { (*consumer_ptr).wakeups }, 1);
    assert!(fifo.is_empty());
}

// ============ Event-list insertion under interference ============

static RESUME_TARGET: AtomicPtr<Task> = AtomicPtr::new(std::ptr::null_mut());

fn resume_target_once() {
    let target = RESUME_TARGET.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if let Some(target) = NonNull::new(target) {
        task_resume(target);
    }
}

fn idle_task(_: *mut ()) {
    task_suspend(None);
}

#[test]
fn pend_survives_an_interrupt_resuming_the_waiter_mid_scan() {
    let _guard = setup();
    let sem: &'static Semaphore = leak(Semaphore::new_locked(1));
    let task = spawn(0, idle_task, std::ptr::null_mut());

    kernel_start();

    // While the pend scan runs with interrupts enabled, an "interrupt"
    // resumes the very task that is enqueuing itself.
    RESUME_TARGET.store(task.as_ptr(), Ordering::SeqCst);
    monostack::port::set_interference_hook(Some(resume_target_once));

    set_current_task(CurrentTask::Task(task));
    sem.pend(MAX_DELAY);
    set_current_task(CurrentTask::None);

    monostack::port::set_interference_hook(None);

    // The resume won: the task is ready, not waiting, and the hook fired.
    assert!(RESUME_TARGET.load(Ordering::SeqCst).is_null());
    assert_eq!(unsafe { task.as_ref() }.state(), TaskState::Ready);
    assert_eq!(get_current_task(), CurrentTask::None);

    // No waiter left behind: a give keeps its unit.
    sem.give().unwrap();
    assert_eq!(sem.get_count(), 1);
}
