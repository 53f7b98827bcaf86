//! Cooperative cancellation for long-lived loops.
//!
//! Every loop in the runtime (tick scheduler, GPU worker, frame
//! processor) owns a clone of a [`CancellationToken`] and polls it once
//! per iteration. Cancelling never preempts a tick or a command; it only
//! stops the next iteration from starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::Mutex;

struct Inner {
    cancelled: AtomicBool,
    /// Thread to unpark on cancel, so a parked sleep ends promptly.
    waiter: Mutex<Option<Thread>>,
}

/// Shared cancellation flag with an optional wake-up target.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

// Compile-time assertion: CancellationToken must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<CancellationToken>();
};

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                waiter: Mutex::new(None),
            }),
        }
    }

    /// Request cancellation and wake the registered loop thread, if any.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        if let Some(thread) = self.inner.waiter.lock().as_ref() {
            thread.unpark();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register the calling thread as the one to unpark on cancel.
    ///
    /// Loop threads call this once at startup.
    pub fn register_current_thread(&self) {
        *self.inner.waiter.lock() = Some(thread::current());
    }

    /// Unpark the registered loop thread without cancelling.
    ///
    /// Used to cut a sleep short when there is new work for the loop.
    pub fn wake(&self) {
        if let Some(thread) = self.inner.waiter.lock().as_ref() {
            thread.unpark();
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
