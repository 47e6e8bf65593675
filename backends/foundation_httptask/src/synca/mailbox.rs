use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use concurrent_queue::ConcurrentQueue;

/// [`RequestQueue`] is an unbounded FIFO mailbox with many producers and a
/// single consumer.
///
/// Pushing never blocks. Popping parks the consumer thread for at most the
/// provided duration; a push or an explicit [`RequestQueue::wake`] unparks it
/// early.
pub struct RequestQueue<T> {
    items: ConcurrentQueue<T>,
    waiter: Mutex<Option<Thread>>,
    woken: AtomicBool,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for RequestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.items.len())
            .finish()
    }
}

impl<T> RequestQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: ConcurrentQueue::unbounded(),
            waiter: Mutex::new(None),
            woken: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `push` appends the item at the tail of the queue and wakes the
    /// consumer if it is currently parked in [`RequestQueue::pop`].
    pub fn push(&self, item: T) {
        // the queue is unbounded and never closed, a push cannot be refused.
        if self.items.push(item).is_err() {
            tracing::error!("RequestQueue refused a push on an unbounded queue");
            return;
        }
        self.unpark_waiter();
    }

    /// `try_pop` returns the head of the queue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.items.pop().ok()
    }

    /// `pop` returns the head of the queue, waiting at most `timeout` for an
    /// item to arrive. `None` means the window elapsed with nothing to
    /// deliver (or the consumer was woken without work) and is not an error.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Ok(item) = self.items.pop() {
                return Some(item);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            self.register_waiter();

            // a push may have landed between the failed pop and registration.
            if let Ok(item) = self.items.pop() {
                self.clear_waiter();
                return Some(item);
            }

            if self.woken.swap(false, Ordering::AcqRel) {
                self.clear_waiter();
                return None;
            }

            thread::park_timeout(deadline - now);
            self.clear_waiter();

            // woken without work: hand control back so the caller can look
            // at its own state (e.g. an abort signal) before waiting again.
            if self.items.is_empty() && self.woken.swap(false, Ordering::AcqRel) {
                return None;
            }
        }
    }

    /// `wake` makes a consumer waiting in [`RequestQueue::pop`] return
    /// early, even when nothing was pushed.
    pub fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        self.unpark_waiter();
    }

    fn unpark_waiter(&self) {
        if let Ok(waiter) = self.waiter.lock() {
            if let Some(thread) = waiter.as_ref() {
                thread.unpark();
            }
        }
    }

    fn register_waiter(&self) {
        if let Ok(mut waiter) = self.waiter.lock() {
            *waiter = Some(thread::current());
        }
    }

    fn clear_waiter(&self) {
        if let Ok(mut waiter) = self.waiter.lock() {
            *waiter = None;
        }
    }
}
