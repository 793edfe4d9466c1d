//! Bounded item queue. Fixed-size items in a caller-provided ring buffer.
//!
//! Payload copies happen outside the critical section, protected by the
//! `w_lock`/`r_lock` in-flight counters: each producer reserves its slot
//! under the critical section, copies with interrupts enabled, and only the
//! outermost producer publishes the accumulated count. An item becomes
//! visible to readers only after the slowest concurrent producer finishes
//! its copy. Consumers mirror the scheme.

use crate::cs_cell::CsCell;
use crate::event::{self, EventRw};
use crate::kernel::{scheduler_lock, scheduler_unlock};
use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::types::{Len, Tick};

struct QueueInner {
    item_size: Len,
    free: Len,
    used: Len,
    w_lock: Len,
    r_lock: Len,
    head: *mut u8,
    tail: *mut u8,
    buff: *mut u8,
    buff_end: *mut u8,
    event: EventRw,
}

/// Bounded queue of fixed-size items.
///
/// `free + used + w_lock + r_lock` always equals the capacity.
pub struct Queue {
    inner: CsCell<QueueInner>,
}

impl Queue {
    /// Create an unconfigured queue; call [`Queue::init`] before use.
    pub const fn new() -> Self {
        Queue {
            inner: CsCell::new(QueueInner {
                item_size: 0,
                free: 0,
                used: 0,
                w_lock: 0,
                r_lock: 0,
                head: core::ptr::null_mut(),
                tail: core::ptr::null_mut(),
                buff: core::ptr::null_mut(),
                buff_end: core::ptr::null_mut(),
                event: EventRw::new(),
            }),
        }
    }

    /// Attach the backing buffer. The capacity is
    /// `buff.len() / item_size` items.
    pub fn init(&self, buff: &'static mut [u8], item_size: Len) {
        assert!(item_size > 0, "queue_init(): zero item size");
        assert!(
            buff.len() % item_size as usize == 0,
            "queue_init(): buffer not a multiple of the item size"
        );
        let length = buff.len() / item_size as usize;
        assert!(
            length > 0 && length <= Len::MAX as usize,
            "queue_init(): invalid capacity"
        );

        let _cs = CriticalSection::enter();
        let q = unsafe { &mut *self.inner.as_ptr() };
        let base = buff.as_mut_ptr();
        q.item_size = item_size;
        q.free = length as Len;
        q.used = 0;
        q.w_lock = 0;
        q.r_lock = 0;
        q.head = base;
        q.tail = base;
        q.buff = base;
        q.buff_end = unsafe { base.add((length - 1) * item_size as usize) };
        q.event.init();
    }

    /// Pop the front item into `out`. Fails when the queue is empty.
    ///
    /// Any-context. `out.len()` must equal the item size.
    pub fn read(&self, out: &mut [u8]) -> KernelResult<()> {
        let pos;
        let lock;
        {
            let _cs = CriticalSection::enter();
            let q = unsafe { &mut *self.inner.as_ptr() };
            assert_eq!(
                out.len(),
                q.item_size as usize,
                "queue_read(): wrong item size"
            );

            if q.used == 0 {
                return Err(KernelError::QueueEmpty);
            }

            pos = q.head;
            q.head = unsafe { q.head.add(q.item_size as usize) };
            if q.head > q.buff_end {
                q.head = q.buff;
            }

            lock = q.r_lock;
            q.r_lock += 1;
            q.used -= 1;
        }

        unsafe { core::ptr::copy_nonoverlapping(pos, out.as_mut_ptr(), out.len()) };
        port::interference_point();

        {
            let _cs = CriticalSection::enter();
            let q = unsafe { &mut *self.inner.as_ptr() };

            if lock == 0 {
                // Outermost consumer: publish every finished read.
                q.free += q.r_lock;
                q.r_lock = 0;
            }

            scheduler_lock();
            unsafe { event::unblock_one(&mut q.event.list_write) };
        }
        scheduler_unlock();

        Ok(())
    }

    /// Push an item at the back. Fails when the queue is full.
    ///
    /// Any-context. `item.len()` must equal the item size.
    pub fn write(&self, item: &[u8]) -> KernelResult<()> {
        let pos;
        let lock;
        {
            let _cs = CriticalSection::enter();
            let q = unsafe { &mut *self.inner.as_ptr() };
            assert_eq!(
                item.len(),
                q.item_size as usize,
                "queue_write(): wrong item size"
            );

            if q.free == 0 {
                return Err(KernelError::QueueFull);
            }

            pos = q.tail;
            q.tail = unsafe { q.tail.add(q.item_size as usize) };
            if q.tail > q.buff_end {
                q.tail = q.buff;
            }

            lock = q.w_lock;
            q.w_lock += 1;
            q.free -= 1;

            scheduler_lock();
        }

        unsafe { core::ptr::copy_nonoverlapping(item.as_ptr(), pos, item.len()) };
        port::interference_point();

        {
            let _cs = CriticalSection::enter();
            let q = unsafe { &mut *self.inner.as_ptr() };

            if lock == 0 {
                // Outermost producer: publish every finished write.
                q.used += q.w_lock;
                q.w_lock = 0;
            }

            unsafe { event::unblock_one(&mut q.event.list_read) };
        }
        scheduler_unlock();

        Ok(())
    }

    /// Read; on failure pend until an item arrives or the timeout expires.
    /// Returns the result of the read attempt.
    pub fn read_pend(&self, out: &mut [u8], ticks_to_wait: Tick) -> KernelResult<()> {
        let result = self.read(out);
        if result.is_err() {
            self.pend_read(ticks_to_wait);
        }
        result
    }

    /// Write; on failure pend until a slot frees or the timeout expires.
    /// Returns the result of the write attempt.
    pub fn write_pend(&self, item: &[u8], ticks_to_wait: Tick) -> KernelResult<()> {
        let result = self.write(item);
        if result.is_err() {
            self.pend_write(ticks_to_wait);
        }
        result
    }

    /// Block until the queue has an item to read or the timeout expires.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend_read(&self, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let q = unsafe { &mut *self.inner.as_ptr() };
        if q.used == 0 {
            unsafe {
                event::pre_pend_task(&mut q.event.list_read, task);
                port::interrupts_enable();
                event::pend_task(&mut q.event.list_read, task, ticks_to_wait);
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Block until the queue has a free slot or the timeout expires.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend_write(&self, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let q = unsafe { &mut *self.inner.as_ptr() };
        if q.free == 0 {
            unsafe {
                event::pre_pend_task(&mut q.event.list_write, task);
                port::interrupts_enable();
                event::pend_task(&mut q.event.list_write, task, ticks_to_wait);
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Number of readable items.
    pub fn get_used(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.used
    }

    /// Number of writable slots.
    pub fn get_free(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.free
    }

    /// Total capacity in items.
    pub fn get_length(&self) -> Len {
        let _cs = CriticalSection::enter();
        let q = unsafe { &*self.inner.as_ptr() };
        q.free + q.used + q.w_lock + q.r_lock
    }

    /// Item size in bytes. Constant after initialization.
    pub fn get_item_size(&self) -> Len {
        unsafe { &*self.inner.as_ptr() }.item_size
    }

    pub fn is_empty(&self) -> bool {
        self.get_used() == 0
    }

    pub fn is_full(&self) -> bool {
        self.get_free() == 0
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
