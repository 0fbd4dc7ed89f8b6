//! Cancellable background task signalling
//!
//! A `CancelToken` couples a cancellation flag with a completion signal.
//! The foreground owner blocks on `wait()`; the background worker polls
//! `is_cancelled()` between units of work and calls `complete()` when done.
//! `cancel()` releases the blocked waiter immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    done: Mutex<bool>,
    signal: Condvar,
}

/// Shared handle for cancelling and awaiting one background task
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and release any blocked waiter
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _done = self.inner.done.lock();
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Mark the task finished and release any blocked waiter
    pub fn complete(&self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.signal.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.done.lock()
    }

    /// Block until the task completes or is cancelled
    pub fn wait(&self) {
        let mut done = self.inner.done.lock();
        while !*done && !self.is_cancelled() {
            self.inner.signal.wait(&mut done);
        }
    }
}
