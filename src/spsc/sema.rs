// Counting semaphore backing the blocking queue variants.
//
// An atomic count serves `signal` and `try_wait` without any lock; a thread
// that has to sleep spins briefly, then registers itself and parks until a
// signal arrives. At most one thread ever waits on a given semaphore here:
// the single producer waits on free slots, the single consumer on items, so
// a single registered thread handle is all the parking protocol needs.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

const SPIN_LIMIT: usize = 128;

pub(super) struct Semaphore {
    count: AtomicUsize,
    has_waiter: AtomicBool,
    waiter: Mutex<Option<Thread>>,
}

impl Semaphore {
    pub(super) fn new(initial: usize) -> Self {
        Semaphore {
            count: AtomicUsize::new(initial),
            has_waiter: AtomicBool::new(false),
            waiter: Mutex::new(None),
        }
    }

    /// Increments the count and wakes the waiter, if one is parked.
    pub(super) fn signal(&self) {
        // SeqCst on the increment and the flag load: either the waiter's
        // registration is visible here and it gets unparked, or the
        // increment is visible to the waiter's re-check before it parks.
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.has_waiter.load(Ordering::SeqCst) {
            let slot = self.waiter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(t) = slot.as_ref() {
                t.unpark();
            }
        }
    }

    /// Decrements the count if it is positive. Never blocks.
    pub(super) fn try_wait(&self) -> bool {
        let mut count = self.count.load(Ordering::SeqCst);
        while count > 0 {
            match self
                .count
                .compare_exchange_weak(count, count - 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
        false
    }

    /// Decrements the count, parking the calling thread until it can.
    pub(super) fn wait(&self) {
        if self.spin_wait() {
            return;
        }
        self.register();
        while !self.try_wait() {
            thread::park();
        }
        self.unregister();
    }

    /// Like `wait`, bounded by `timeout`. Returns false, with the count
    /// untouched, if the timeout expires first.
    pub(super) fn wait_timed(&self, timeout: Duration) -> bool {
        if self.spin_wait() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        self.register();
        let acquired = loop {
            if self.try_wait() {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            thread::park_timeout(deadline - now);
        };
        self.unregister();
        acquired
    }

    /// A possibly-stale view of the count; safe from any thread.
    pub(super) fn available_approx(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn spin_wait(&self) -> bool {
        for _ in 0..SPIN_LIMIT {
            if self.try_wait() {
                return true;
            }
            hint::spin_loop();
        }
        false
    }

    fn register(&self) {
        *self.waiter.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current());
        self.has_waiter.store(true, Ordering::SeqCst);
    }

    fn unregister(&self) {
        self.has_waiter.store(false, Ordering::SeqCst);
        *self.waiter.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
