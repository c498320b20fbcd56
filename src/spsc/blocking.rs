// Blocking layer over the unbounded block queue: one counting semaphore
// tracks the number of enqueued elements, letting the consumer sleep instead
// of spinning on try_dequeue. Enqueue never blocks (the inner queue grows),
// so only the dequeue side carries wait and timed variants.

use std::fmt;
use std::time::Duration;

use crate::spsc::block_queue::BlockQueue;
use crate::spsc::sema::Semaphore;
use crate::spsc::{PopError, PushError};
use crate::SpscQueue;

/// [`BlockQueue`] paired with a counting semaphore for blocking and timed
/// dequeues.
pub struct BlockingQueue<T: Send, const MAX_BLOCK_SIZE: usize = 512> {
    inner: BlockQueue<T, MAX_BLOCK_SIZE>,
    items: Semaphore,
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> BlockingQueue<T, MAX_BLOCK_SIZE> {
    /// Builds a queue holding at least 15 elements without allocating again.
    pub fn new() -> Self {
        Self::with_capacity(15)
    }

    /// Builds a queue holding at least `size` elements without allocating
    /// again.
    pub fn with_capacity(size: usize) -> Self {
        BlockingQueue {
            inner: BlockQueue::with_capacity(size),
            items: Semaphore::new(0),
        }
    }

    /// Non-allocating enqueue; see [`BlockQueue::try_enqueue`].
    pub fn try_enqueue(&self, item: T) -> Result<(), PushError<T>> {
        self.inner.try_enqueue(item)?;
        self.items.signal();
        Ok(())
    }

    /// Allocating enqueue; see [`BlockQueue::enqueue`].
    pub fn enqueue(&self, item: T) -> Result<(), PushError<T>> {
        self.inner.enqueue(item)?;
        self.items.signal();
        Ok(())
    }

    /// Dequeues, failing immediately when the queue is empty.
    /// Consumer-side only.
    pub fn try_dequeue(&self) -> Result<T, PopError> {
        if !self.items.try_wait() {
            return Err(PopError);
        }
        Ok(self.take())
    }

    /// Dequeues, blocking until an element arrives. Consumer-side only.
    pub fn wait_dequeue(&self) -> T {
        self.items.wait();
        self.take()
    }

    /// Dequeues, blocking at most `timeout`. Consumer-side only.
    pub fn wait_dequeue_timed(&self, timeout: Duration) -> Result<T, PopError> {
        if !self.items.wait_timed(timeout) {
            return Err(PopError);
        }
        Ok(self.take())
    }

    /// See [`BlockQueue::peek`]. Does not consume an item token.
    pub fn peek(&self) -> Option<&T> {
        self.inner.peek()
    }

    /// Removes the front element without returning it. Consumer-side only.
    pub fn discard(&self) -> Result<(), PopError> {
        if !self.items.try_wait() {
            return Err(PopError);
        }
        self.take();
        Ok(())
    }

    /// A possibly-stale element count, safe from either role.
    pub fn size_approx(&self) -> usize {
        self.items.available_approx()
    }

    /// See [`BlockQueue::max_capacity`].
    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    fn take(&self) -> T {
        // A token is only ever signalled after the matching element is
        // published, so the inner dequeue cannot come up empty.
        match self.inner.try_dequeue() {
            Ok(item) => item,
            Err(PopError) => unreachable!("item token held but the inner queue was empty"),
        }
    }
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> Default for BlockingQueue<T, MAX_BLOCK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send, const MAX_BLOCK_SIZE: usize> fmt::Debug for BlockingQueue<T, MAX_BLOCK_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingQueue")
            .field("size_approx", &self.size_approx())
            .field("max_capacity", &self.max_capacity())
            .finish()
    }
}

impl<T: Send + 'static, const MAX_BLOCK_SIZE: usize> SpscQueue<T>
    for BlockingQueue<T, MAX_BLOCK_SIZE>
{
    type PushError = PushError<T>;
    type PopError = PopError;

    fn push(&self, item: T) -> Result<(), Self::PushError> {
        self.enqueue(item)
    }

    fn pop(&self) -> Result<T, Self::PopError> {
        self.try_dequeue()
    }

    fn size_approx(&self) -> usize {
        BlockingQueue::size_approx(self)
    }

    fn max_capacity(&self) -> usize {
        BlockingQueue::max_capacity(self)
    }
}
