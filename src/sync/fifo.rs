//! Byte FIFO. Byte-granular queue that moves several bytes per call.
//!
//! Uses the same in-flight `w_lock`/`r_lock` publication protocol as the
//! item queue. Waiters record how many bytes they need in their event node,
//! and a producer wakes the tail waiter only once enough bytes have
//! accumulated, so a task waiting for five bytes sleeps through a partial
//! write and wakes exactly once.

use crate::cs_cell::CsCell;
use crate::event::{self, EventRw};
use crate::kernel::{scheduler_lock, scheduler_unlock};
use crate::critical::CriticalSection;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::types::{Len, Tick};

struct FifoInner {
    length: Len,
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

/// Wake the tail writer if enough space accumulated for its request.
///
/// Only the tail waiter is tested; if several could proceed they wake on
/// successive reads.
///
/// # Safety
/// Scheduler locked, inside a critical section.
unsafe fn notify_writers(f: &mut FifoInner) {
    if let Some(waiter) = f.event.list_write.tail() {
        if unsafe { waiter.as_ref() }.value() as Len <= f.free {
            unsafe { event::unblock_one(&mut f.event.list_write) };
        }
    }
}

/// Wake the tail reader if enough bytes accumulated for its request.
///
/// # Safety
/// Scheduler locked, inside a critical section.
unsafe fn notify_readers(f: &mut FifoInner) {
    if let Some(waiter) = f.event.list_read.tail() {
        if unsafe { waiter.as_ref() }.value() as Len <= f.used {
            unsafe { event::unblock_one(&mut f.event.list_read) };
        }
    }
}

/// Byte FIFO backed by a caller-provided buffer.
pub struct Fifo {
    inner: CsCell<FifoInner>,
}

impl Fifo {
    /// Create an unconfigured FIFO; call [`Fifo::init`] before use.
    pub const fn new() -> Self {
        Fifo {
            inner: CsCell::new(FifoInner {
                length: 0,
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

    /// Attach the backing buffer; its length is the FIFO capacity.
    pub fn init(&self, buff: &'static mut [u8]) {
        assert!(
            !buff.is_empty() && buff.len() <= Len::MAX as usize,
            "fifo_init(): invalid capacity"
        );

        let _cs = CriticalSection::enter();
        let f = unsafe { &mut *self.inner.as_ptr() };
        let base = buff.as_mut_ptr();
        f.length = buff.len() as Len;
        f.free = buff.len() as Len;
        f.used = 0;
        f.w_lock = 0;
        f.r_lock = 0;
        f.head = base;
        f.tail = base;
        f.buff = base;
        f.buff_end = unsafe { base.add(buff.len() - 1) };
        f.event.init();
    }

    /// Read one byte. `None` when the FIFO is empty. Any-context.
    pub fn read_byte(&self) -> Option<u8> {
        let byte;
        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            if f.used == 0 {
                return None;
            }

            byte = unsafe { *f.head };
            f.head = if f.head == f.buff_end {
                f.buff
            } else {
                unsafe { f.head.add(1) }
            };

            let lock = f.r_lock;
            f.r_lock += 1;
            f.used -= 1;
            if lock == 0 {
                f.free += f.r_lock;
                f.r_lock = 0;
            }

            scheduler_lock();
            unsafe { notify_writers(f) };
        }
        scheduler_unlock();

        Some(byte)
    }

    /// Write one byte. Fails when the FIFO is full. Any-context.
    pub fn write_byte(&self, byte: u8) -> KernelResult<()> {
        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            if f.free == 0 {
                return Err(KernelError::QueueFull);
            }

            unsafe { *f.tail = byte };
            f.tail = if f.tail == f.buff_end {
                f.buff
            } else {
                unsafe { f.tail.add(1) }
            };

            let lock = f.w_lock;
            f.w_lock += 1;
            f.free -= 1;
            if lock == 0 {
                f.used += f.w_lock;
                f.w_lock = 0;
            }

            scheduler_lock();
            unsafe { notify_readers(f) };
        }
        scheduler_unlock();

        Ok(())
    }

    /// Read up to `out.len()` bytes; returns how many were read, zero when
    /// the FIFO is empty. Any-context.
    pub fn read(&self, out: &mut [u8]) -> Len {
        let val;
        let pos;
        let lock;
        let first;
        let from_begin;
        let base;
        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            let want = core::cmp::min(out.len(), Len::MAX as usize) as Len;
            val = core::cmp::min(want, f.used);
            if val == 0 {
                return 0;
            }

            pos = f.head;
            base = f.buff;
            let head_off = unsafe { f.head.offset_from(f.buff) } as usize;
            first = core::cmp::min(val as usize, f.length as usize - head_off);
            from_begin = val as usize - first;
            f.head = if from_begin > 0 {
                unsafe { f.buff.add(from_begin) }
            } else {
                let next = unsafe { f.head.add(first) };
                if next > f.buff_end {
                    f.buff
                } else {
                    next
                }
            };

            lock = f.r_lock;
            f.r_lock += val;
            f.used -= val;
        }

        unsafe {
            core::ptr::copy_nonoverlapping(pos, out.as_mut_ptr(), first);
            if from_begin > 0 {
                core::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), from_begin);
            }
        }
        port::interference_point();

        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            if lock == 0 {
                f.free += f.r_lock;
                f.r_lock = 0;
            }

            scheduler_lock();
            unsafe { notify_writers(f) };
        }
        scheduler_unlock();

        val
    }

    /// Write up to `data.len()` bytes; returns how many were written, zero
    /// when the FIFO is full. Any-context.
    pub fn write(&self, data: &[u8]) -> Len {
        let val;
        let pos;
        let lock;
        let first;
        let from_begin;
        let base;
        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            let want = core::cmp::min(data.len(), Len::MAX as usize) as Len;
            val = core::cmp::min(want, f.free);
            if val == 0 {
                return 0;
            }

            pos = f.tail;
            base = f.buff;
            let tail_off = unsafe { f.tail.offset_from(f.buff) } as usize;
            first = core::cmp::min(val as usize, f.length as usize - tail_off);
            from_begin = val as usize - first;
            f.tail = if from_begin > 0 {
                unsafe { f.buff.add(from_begin) }
            } else {
                let next = unsafe { f.tail.add(first) };
                if next > f.buff_end {
                    f.buff
                } else {
                    next
                }
            };

            lock = f.w_lock;
            f.w_lock += val;
            f.free -= val;

            scheduler_lock();
        }

        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), pos, first);
            if from_begin > 0 {
                core::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, from_begin);
            }
        }
        port::interference_point();

        {
            let _cs = CriticalSection::enter();
            let f = unsafe { &mut *self.inner.as_ptr() };

            if lock == 0 {
                f.used += f.w_lock;
                f.w_lock = 0;
            }

            unsafe { notify_readers(f) };
        }
        scheduler_unlock();

        val
    }

    /// Read; on failure pend until `out.len()` bytes are available or the
    /// timeout expires. Returns how many bytes the read attempt moved.
    pub fn read_pend(&self, out: &mut [u8], ticks_to_wait: Tick) -> Len {
        let val = self.read(out);
        if val == 0 {
            self.pend_read(out.len() as Len, ticks_to_wait);
        }
        val
    }

    /// Write; on failure pend until `data.len()` bytes of space are
    /// available or the timeout expires. Returns how many bytes the write
    /// attempt moved.
    pub fn write_pend(&self, data: &[u8], ticks_to_wait: Tick) -> Len {
        let val = self.write(data);
        if val == 0 {
            self.pend_write(data.len() as Len, ticks_to_wait);
        }
        val
    }

    /// Block until at least `length` bytes can be read or the timeout
    /// expires. The requested count rides in the waiter's event node.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend_read(&self, length: Len, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let f = unsafe { &mut *self.inner.as_ptr() };
        if f.used < length {
            unsafe {
                (*task.as_ptr()).event_node.set_value(length as Tick);
                event::pre_pend_task(&mut f.event.list_read, task);
                port::interrupts_enable();
                event::pend_task(&mut f.event.list_read, task, ticks_to_wait);
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Block until at least `length` bytes of space are free or the timeout
    /// expires.
    ///
    /// Task-only. `MAX_DELAY` waits without timeout.
    pub fn pend_write(&self, length: Len, ticks_to_wait: Tick) {
        if ticks_to_wait == 0 {
            return;
        }
        let task = event::current_task_for_pend();

        scheduler_lock();
        port::interrupts_disable();
        let f = unsafe { &mut *self.inner.as_ptr() };
        if f.free < length {
            unsafe {
                (*task.as_ptr()).event_node.set_value(length as Tick);
                event::pre_pend_task(&mut f.event.list_write, task);
                port::interrupts_enable();
                event::pend_task(&mut f.event.list_write, task, ticks_to_wait);
            }
        } else {
            port::interrupts_enable();
        }
        scheduler_unlock();
    }

    /// Number of readable bytes.
    pub fn get_used(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.used
    }

    /// Number of writable bytes.
    pub fn get_free(&self) -> Len {
        let _cs = CriticalSection::enter();
        unsafe { &*self.inner.as_ptr() }.free
    }

    /// Capacity in bytes. Constant after initialization.
    pub fn get_length(&self) -> Len {
        unsafe { &*self.inner.as_ptr() }.length
    }

    pub fn is_empty(&self) -> bool {
        self.get_used() == 0
    }

    pub fn is_full(&self) -> bool {
        self.get_free() == 0
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}
