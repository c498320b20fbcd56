// Unbounded wait-free SPSC queue over a circular ring of fixed-size blocks.
//
// Each block is a power-of-two circular buffer with one slot left unused, so
// front == tail always means empty and (tail + 1) & mask == front means full.
// The producer owns `tail` and the `tail_block` cursor, the consumer owns
// `front` and `front_block`, and each side keeps a non-atomic shadow of the
// other's index so the hot path usually touches no cross-thread cache line.
// The ring only grows: a drained block is reused in place, never freed, so
// every block strictly between tail_block and front_block along `next` is
// known empty.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr;
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use crate::spsc::{PopError, PushError};
use crate::SpscQueue;

/// Block capacity ceiling used when no explicit `MAX_BLOCK_SIZE` is given.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 512;

const CACHE_LINE_SIZE: usize = 64;

#[repr(C)]
struct Block<T> {
    // Consumer line: the index it advances plus its shadow of `tail`.
    front: AtomicUsize,
    local_tail: Cell<usize>,
    _pad0: [u8; CACHE_LINE_SIZE - 16],
    // Producer line.
    tail: AtomicUsize,
    local_front: Cell<usize>,
    _pad1: [u8; CACHE_LINE_SIZE - 16],
    // Written once per block lifetime; kept off the index lines.
    next: AtomicPtr<Block<T>>,
    data: *mut MaybeUninit<T>,
    size_mask: usize,
}

fn block_layout<T>(capacity: usize) -> Option<(Layout, usize)> {
    let header = Layout::new::<Block<T>>();
    let slots = Layout::array::<MaybeUninit<T>>(capacity).ok()?;
    header.extend(slots).ok()
}

// One raw allocation per block: the header first, then `capacity`
// element-aligned slots.
fn make_block<T>(capacity: usize) -> Option<*mut Block<T>> {
    debug_assert!(capacity.is_power_of_two());
    let (layout, data_offset) = block_layout::<T>(capacity)?;
    unsafe {
        let raw = alloc::alloc(layout);
        if raw.is_null() {
            return None;
        }
        let block = raw as *mut Block<T>;
        ptr::write(
            block,
            Block {
                front: AtomicUsize::new(0),
                local_tail: Cell::new(0),
                _pad0: [0; CACHE_LINE_SIZE - 16],
                tail: AtomicUsize::new(0),
                local_front: Cell::new(0),
                _pad1: [0; CACHE_LINE_SIZE - 16],
                next: AtomicPtr::new(ptr::null_mut()),
                data: raw.add(data_offset) as *mut MaybeUninit<T>,
                size_mask: capacity - 1,
            },
        );
        Some(block)
    }
}

#[cold]
fn alloc_failed<T>(capacity: usize) -> ! {
    match block_layout::<T>(capacity) {
        Some((layout, _)) => alloc::handle_alloc_error(layout),
        None => panic!("block capacity overflows the address space"),
    }
}

unsafe fn free_block<T>(block: *mut Block<T>) {
    let capacity = (*block).size_mask + 1;
    let (layout, _) =
        block_layout::<T>(capacity).expect("layout was validated when the block was allocated");
    alloc::dealloc(block as *mut u8, layout);
}

// Moves the element at `front` out and publishes the new front index.
unsafe fn take_front<T>(block: &Block<T>, front: usize) -> T {
    let item = ptr::read(block.data.add(front)).assume_init();
    block
        .front
        .store((front + 1) & block.size_mask, Ordering::Release);
    item
}

// Debug-only reentrancy gate: each role may be inside at most one operation
// at a time.
#[cfg(debug_assertions)]
struct RoleGuard<'a> {
    flag: &'a AtomicBool,
}

#[cfg(debug_assertions)]
impl<'a> RoleGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        assert!(
            !flag.swap(true, Ordering::Relaxed),
            "concurrent enqueue or dequeue detected; each role belongs to one thread at a time"
        );
        RoleGuard { flag }
    }
}

#[cfg(debug_assertions)]
impl Drop for RoleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Unbounded SPSC queue. [`BlockQueue::try_enqueue`] never allocates;
/// [`BlockQueue::enqueue`] splices a new block into the ring when every
/// existing block is occupied.
#[repr(C)]
pub struct BlockQueue<T: Send, const MAX_BLOCK_SIZE: usize = 512> {
    front_block: AtomicPtr<Block<T>>,
    _pad: [u8; CACHE_LINE_SIZE - 8],
    tail_block: AtomicPtr<Block<T>>,
    largest_block_size: Cell<usize>,
    #[cfg(debug_assertions)]
    enqueuing: AtomicBool,
    #[cfg(debug_assertions)]
    dequeuing: AtomicBool,
}

unsafe impl<T: Send, const MAX_BLOCK_SIZE: usize> Send for BlockQueue<T, MAX_BLOCK_SIZE> {}
unsafe impl<T: Send, const MAX_BLOCK_SIZE: usize> Sync for BlockQueue<T, MAX_BLOCK_SIZE> {}

impl<T: Send, const MAX_BLOCK_SIZE: usize> BlockQueue<T, MAX_BLOCK_SIZE> {
    /// Builds a queue holding at least 15 elements without allocating again.
    pub fn new() -> Self {
        Self::with_capacity(15)
    }

    /// Builds a queue holding at least `size` elements without allocating
    /// again. When `size` exceeds what one block may hold, several blocks of
    /// `MAX_BLOCK_SIZE` are linked into the initial ring.
    pub fn with_capacity(size: usize) -> Self {
        assert!(
            MAX_BLOCK_SIZE.is_power_of_two(),
            "MAX_BLOCK_SIZE must be a power of two"
        );
        assert!(MAX_BLOCK_SIZE >= 2, "MAX_BLOCK_SIZE must be at least 2");

        // One spare slot per block disambiguates empty from full.
        let mut largest = (size + 1).next_power_of_two();
        let first;
        if largest > MAX_BLOCK_SIZE * 2 {
            // Usable slots are (block size - 1) per block, with one spare
            // block so the producer can keep writing while the consumer sits
            // in a partially drained block.
            let block_count = (size + MAX_BLOCK_SIZE * 2 - 3) / (MAX_BLOCK_SIZE - 1);
            largest = MAX_BLOCK_SIZE;
            let mut head: *mut Block<T> = ptr::null_mut();
            let mut last: *mut Block<T> = ptr::null_mut();
            for _ in 0..block_count {
                let block = match make_block::<T>(largest) {
                    Some(b) => b,
                    None => alloc_failed::<T>(largest),
                };
                unsafe {
                    if head.is_null() {
                        head = block;
                    } else {
                        (*last).next.store(block, Ordering::Relaxed);
                    }
                    last = block;
                    (*block).next.store(head, Ordering::Relaxed);
                }
            }
            first = head;
        } else {
            let block = match make_block::<T>(largest) {
                Some(b) => b,
                None => alloc_failed::<T>(largest),
            };
            unsafe { (*block).next.store(block, Ordering::Relaxed) };
            first = block;
        }

        let queue = BlockQueue {
            front_block: AtomicPtr::new(first),
            _pad: [0; CACHE_LINE_SIZE - 8],
            tail_block: AtomicPtr::new(first),
            largest_block_size: Cell::new(largest),
            #[cfg(debug_assertions)]
            enqueuing: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            dequeuing: AtomicBool::new(false),
        };
        // Publish the initialized ring to whichever threads take the roles.
        fence(Ordering::SeqCst);
        queue
    }

    /// Enqueues without allocating; fails when every block in the ring is
    /// occupied. Producer-side only.
    pub fn try_enqueue(&self, item: T) -> Result<(), PushError<T>> {
        self.inner_enqueue(item, false)
    }

    /// Enqueues, splicing a new block into the ring when the ring is full.
    /// Fails only when that allocation fails. Producer-side only.
    pub fn enqueue(&self, item: T) -> Result<(), PushError<T>> {
        self.inner_enqueue(item, true)
    }

    fn inner_enqueue(&self, item: T, can_alloc: bool) -> Result<(), PushError<T>> {
        #[cfg(debug_assertions)]
        let _guard = RoleGuard::enter(&self.enqueuing);

        unsafe {
            let tail_block = self.tail_block.load(Ordering::Relaxed);
            let tb = &*tail_block;
            let block_tail = tb.tail.load(Ordering::Relaxed);
            let next_tail = (block_tail + 1) & tb.size_mask;

            // The shadow of `front` may lag, but a stale value only ever
            // claims the block fuller than it is; a fresh acquire load
            // settles the disagreement.
            let mut front = tb.local_front.get();
            if next_tail == front {
                front = tb.front.load(Ordering::Acquire);
                tb.local_front.set(front);
            }
            if next_tail != front {
                ptr::write(tb.data.add(block_tail), MaybeUninit::new(item));
                tb.tail.store(next_tail, Ordering::Release);
                return Ok(());
            }

            let next = tb.next.load(Ordering::Acquire);
            if next != self.front_block.load(Ordering::Acquire) {
                // Any block strictly between tail_block and front_block is
                // drained, so the successor takes the element immediately.
                let nb = &*next;
                let front = nb.front.load(Ordering::Acquire);
                nb.local_front.set(front);
                let nb_tail = nb.tail.load(Ordering::Relaxed);
                debug_assert_eq!(front, nb_tail);
                ptr::write(nb.data.add(nb_tail), MaybeUninit::new(item));
                nb.tail.store((nb_tail + 1) & nb.size_mask, Ordering::Release);
                self.tail_block.store(next, Ordering::Release);
                return Ok(());
            }

            if !can_alloc {
                return Err(PushError(item));
            }

            // Ring exhausted: splice a fresh block between tail_block and
            // its successor, then publish it as the new tail_block.
            let largest = self.largest_block_size.get();
            let new_size = if largest >= MAX_BLOCK_SIZE {
                largest
            } else {
                largest * 2
            };
            let new_block = match make_block::<T>(new_size) {
                Some(b) => b,
                None => return Err(PushError(item)),
            };
            self.largest_block_size.set(new_size);
            let nb = &*new_block;
            ptr::write(nb.data, MaybeUninit::new(item));
            nb.tail.store(1, Ordering::Relaxed);
            nb.local_tail.set(1);
            nb.next.store(tb.next.load(Ordering::Relaxed), Ordering::Relaxed);
            tb.next.store(new_block, Ordering::Release);
            self.tail_block.store(new_block, Ordering::Release);
            Ok(())
        }
    }

    /// Dequeues the front element. Consumer-side only.
    pub fn try_dequeue(&self) -> Result<T, PopError> {
        #[cfg(debug_assertions)]
        let _guard = RoleGuard::enter(&self.dequeuing);

        unsafe {
            let front_block = self.front_block.load(Ordering::Relaxed);
            let fb = &*front_block;
            let block_front = fb.front.load(Ordering::Relaxed);

            // The shadow of `tail` may lag; the re-read is what keeps an
            // element enqueued after the shadow was taken from being missed.
            let mut block_tail = fb.local_tail.get();
            if block_front == block_tail {
                block_tail = fb.tail.load(Ordering::Acquire);
                fb.local_tail.set(block_tail);
            }
            if block_front != block_tail {
                return Ok(take_front(fb, block_front));
            }

            if front_block != self.tail_block.load(Ordering::Acquire) {
                // The producer may have filled this block and moved on
                // between the reads above; look once more before advancing.
                let front_block = self.front_block.load(Ordering::Relaxed);
                let fb = &*front_block;
                let tail = fb.tail.load(Ordering::Acquire);
                fb.local_tail.set(tail);
                let block_front = fb.front.load(Ordering::Relaxed);
                if block_front != tail {
                    return Ok(take_front(fb, block_front));
                }

                // This block is drained for good. The successor holds an
                // element, because tail_block only ever advances after a
                // write to the block it advances to.
                let next = fb.next.load(Ordering::Acquire);
                let nb = &*next;
                let next_front = nb.front.load(Ordering::Relaxed);
                let next_tail = nb.tail.load(Ordering::Acquire);
                nb.local_tail.set(next_tail);
                debug_assert_ne!(next_front, next_tail);

                self.front_block.store(next, Ordering::Release);
                return Ok(take_front(nb, next_front));
            }

            Err(PopError)
        }
    }

    /// Returns a reference to the front element without removing it, or
    /// `None` if the queue appears empty. Consumer-side only; the reference
    /// is valid until the consumer next removes an element.
    pub fn peek(&self) -> Option<&T> {
        #[cfg(debug_assertions)]
        let _guard = RoleGuard::enter(&self.dequeuing);

        unsafe {
            let front_block = self.front_block.load(Ordering::Relaxed);
            let fb = &*front_block;
            let block_front = fb.front.load(Ordering::Relaxed);

            let mut block_tail = fb.local_tail.get();
            if block_front == block_tail {
                block_tail = fb.tail.load(Ordering::Acquire);
                fb.local_tail.set(block_tail);
            }
            if block_front != block_tail {
                return Some(&*(*fb.data.add(block_front)).as_ptr());
            }

            if front_block != self.tail_block.load(Ordering::Acquire) {
                let front_block = self.front_block.load(Ordering::Relaxed);
                let fb = &*front_block;
                let tail = fb.tail.load(Ordering::Acquire);
                fb.local_tail.set(tail);
                let block_front = fb.front.load(Ordering::Relaxed);
                if block_front != tail {
                    return Some(&*(*fb.data.add(block_front)).as_ptr());
                }

                let next = fb.next.load(Ordering::Acquire);
                let nb = &*next;
                let next_front = nb.front.load(Ordering::Relaxed);
                debug_assert_ne!(next_front, nb.tail.load(Ordering::Acquire));
                return Some(&*(*nb.data.add(next_front)).as_ptr());
            }

            None
        }
    }

    /// Removes the front element without returning it. Consumer-side only.
    pub fn discard(&self) -> Result<(), PopError> {
        self.try_dequeue().map(drop)
    }

    /// Approximate element count; safe from either role.
    pub fn size_approx(&self) -> usize {
        let first = self.front_block.load(Ordering::Acquire);
        let mut block = first;
        let mut count = 0;
        loop {
            unsafe {
                let b = &*block;
                let front = b.front.load(Ordering::Acquire);
                let tail = b.tail.load(Ordering::Acquire);
                count += tail.wrapping_sub(front) & b.size_mask;
                block = b.next.load(Ordering::Acquire);
            }
            if block == first {
                break;
            }
        }
        count
    }

    /// Total elements the current ring can hold without further allocation.
    /// Safe from either role.
    pub fn max_capacity(&self) -> usize {
        let first = self.front_block.load(Ordering::Acquire);
        let mut block = first;
        let mut capacity = 0;
        loop {
            unsafe {
                let b = &*block;
                capacity += b.size_mask;
                block = b.next.load(Ordering::Acquire);
            }
            if block == first {
                break;
            }
        }
        capacity
    }
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> Default for BlockQueue<T, MAX_BLOCK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> Drop for BlockQueue<T, MAX_BLOCK_SIZE> {
    fn drop(&mut self) {
        let first = *self.front_block.get_mut();
        let mut block = first;
        loop {
            unsafe {
                let b = &mut *block;
                let next = *b.next.get_mut();
                if mem::needs_drop::<T>() {
                    let mut front = *b.front.get_mut();
                    let tail = *b.tail.get_mut();
                    while front != tail {
                        ptr::drop_in_place((*b.data.add(front)).as_mut_ptr());
                        front = (front + 1) & b.size_mask;
                    }
                }
                free_block(block);
                block = next;
            }
            if block == first {
                break;
            }
        }
    }
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> fmt::Debug for BlockQueue<T, MAX_BLOCK_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockQueue")
            .field("size_approx", &self.size_approx())
            .field("max_capacity", &self.max_capacity())
            .field("largest_block_size", &self.largest_block_size.get())
            .finish()
    }
}

impl<T: Send + 'static, const MAX_BLOCK_SIZE: usize> SpscQueue<T> for BlockQueue<T, MAX_BLOCK_SIZE> {
    type PushError = PushError<T>;
    type PopError = PopError;

    fn push(&self, item: T) -> Result<(), Self::PushError> {
        self.enqueue(item)
    }

    fn pop(&self) -> Result<T, Self::PopError> {
        self.try_dequeue()
    }

    fn size_approx(&self) -> usize {
        BlockQueue::size_approx(self)
    }

    fn max_capacity(&self) -> usize {
        BlockQueue::max_capacity(self)
    }
}
