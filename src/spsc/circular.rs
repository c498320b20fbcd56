// Bounded wait-free SPSC circular buffer with blocking and timed operations.
//
// One power-of-two slot array and two counting semaphores: `free_slots`
// starts at the requested capacity and gates the producer, `items` starts at
// zero and gates the consumer. The index counters grow without bound and are
// masked at access; at 64 bits they cannot wrap between matched operations.
// All cross-thread ordering rides on the semaphores: an element write
// happens-before the signal that announces it.

use std::cell::Cell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::time::Duration;

use crate::spsc::sema::Semaphore;
use crate::spsc::{PopError, PushError};
use crate::SpscQueue;

const CACHE_LINE_SIZE: usize = 64;

/// Bounded SPSC queue; never allocates after construction.
#[repr(C)]
pub struct CircularQueue<T: Send> {
    buffer: *mut MaybeUninit<T>,
    maxcap: usize,
    mask: usize,
    free_slots: Semaphore,
    items: Semaphore,
    _pad0: [u8; CACHE_LINE_SIZE],
    // Producer-owned enqueue counter, masked at access.
    next_slot: Cell<usize>,
    _pad1: [u8; CACHE_LINE_SIZE - 8],
    // Consumer-owned dequeue counter, masked at access.
    next_item: Cell<usize>,
}

unsafe impl<T: Send> Send for CircularQueue<T> {}
unsafe impl<T: Send> Sync for CircularQueue<T> {}

impl<T: Send> CircularQueue<T> {
    /// Builds a queue holding at most `maxcap` elements. Storage is rounded
    /// up to a power of two; the surplus slots are never handed out.
    pub fn with_capacity(maxcap: usize) -> Self {
        assert!(maxcap > 0, "capacity must be at least 1");
        let capacity = maxcap.next_power_of_two();
        let mut slots: Vec<MaybeUninit<T>> = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(MaybeUninit::uninit());
        }
        let buffer = Box::into_raw(slots.into_boxed_slice()) as *mut MaybeUninit<T>;
        CircularQueue {
            buffer,
            maxcap,
            mask: capacity - 1,
            free_slots: Semaphore::new(maxcap),
            items: Semaphore::new(0),
            _pad0: [0; CACHE_LINE_SIZE],
            next_slot: Cell::new(0),
            _pad1: [0; CACHE_LINE_SIZE - 8],
            next_item: Cell::new(0),
        }
    }

    /// Enqueues, failing immediately when the queue is full.
    /// Producer-side only.
    pub fn try_enqueue(&self, item: T) -> Result<(), PushError<T>> {
        if !self.free_slots.try_wait() {
            return Err(PushError(item));
        }
        self.write_slot(item);
        Ok(())
    }

    /// Enqueues, blocking until a slot frees up. Producer-side only.
    pub fn wait_enqueue(&self, item: T) {
        self.free_slots.wait();
        self.write_slot(item);
    }

    /// Enqueues, blocking at most `timeout`. Hands the element back when the
    /// timeout expires first. Producer-side only.
    pub fn wait_enqueue_timed(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        if !self.free_slots.wait_timed(timeout) {
            return Err(PushError(item));
        }
        self.write_slot(item);
        Ok(())
    }

    /// Dequeues, failing immediately when the queue is empty.
    /// Consumer-side only.
    pub fn try_dequeue(&self) -> Result<T, PopError> {
        if !self.items.try_wait() {
            return Err(PopError);
        }
        Ok(self.read_slot())
    }

    /// Dequeues, blocking until an element arrives. Consumer-side only.
    pub fn wait_dequeue(&self) -> T {
        self.items.wait();
        self.read_slot()
    }

    /// Dequeues, blocking at most `timeout`. Consumer-side only.
    pub fn wait_dequeue_timed(&self, timeout: Duration) -> Result<T, PopError> {
        if !self.items.wait_timed(timeout) {
            return Err(PopError);
        }
        Ok(self.read_slot())
    }

    /// A possibly-stale element count, safe from either role.
    pub fn size_approx(&self) -> usize {
        self.items.available_approx()
    }

    /// The construction-time capacity.
    pub fn max_capacity(&self) -> usize {
        self.maxcap
    }

    // Caller must hold one `free_slots` token.
    fn write_slot(&self, item: T) {
        let i = self.next_slot.get();
        self.next_slot.set(i.wrapping_add(1));
        unsafe { ptr::write(self.buffer.add(i & self.mask), MaybeUninit::new(item)) };
        self.items.signal();
    }

    // Caller must hold one `items` token.
    fn read_slot(&self) -> T {
        let i = self.next_item.get();
        self.next_item.set(i.wrapping_add(1));
        let item = unsafe { ptr::read(self.buffer.add(i & self.mask)).assume_init() };
        self.free_slots.signal();
        item
    }
}

impl<T: Send> Drop for CircularQueue<T> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            let live = self.items.available_approx();
            let first = self.next_item.get();
            for k in 0..live {
                unsafe {
                    let slot = self.buffer.add(first.wrapping_add(k) & self.mask);
                    ptr::drop_in_place((*slot).as_mut_ptr());
                }
            }
        }
        unsafe {
            let _ = Box::from_raw(std::slice::from_raw_parts_mut(self.buffer, self.mask + 1));
        }
    }
}

impl<T: Send> fmt::Debug for CircularQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircularQueue")
            .field("max_capacity", &self.maxcap)
            .field("size_approx", &self.size_approx())
            .finish()
    }
}

impl<T: Send + 'static> SpscQueue<T> for CircularQueue<T> {
    type PushError = PushError<T>;
    type PopError = PopError;

    fn push(&self, item: T) -> Result<(), Self::PushError> {
        self.try_enqueue(item)
    }

    fn pop(&self) -> Result<T, Self::PopError> {
        self.try_dequeue()
    }

    fn size_approx(&self) -> usize {
        CircularQueue::size_approx(self)
    }

    fn max_capacity(&self) -> usize {
        CircularQueue::max_capacity(self)
    }
}
