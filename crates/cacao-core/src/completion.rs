//! Single-assignment completion handles.
//!
//! A [`completion`] pair splits one result slot into a producing
//! [`Completer`] and any number of consuming [`CompletionHandle`]s.
//! The slot is written exactly once: `Completer::resolve` consumes the
//! completer, and dropping an unresolved completer writes
//! [`GpuError::Abandoned`] so waiters are never stranded.
//!
//! Handles need no external locking. They support a blocking
//! [`wait`](CompletionHandle::wait), a bounded
//! [`wait_timeout`](CompletionHandle::wait_timeout) and a non-blocking
//! [`poll`](CompletionHandle::poll).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::GpuError;

struct Slot<T> {
    result: Mutex<Option<Result<T, GpuError>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn fill(&self, result: Result<T, GpuError>) {
        let mut guard = self.result.lock();
        debug_assert!(guard.is_none(), "completion slot assigned twice");
        if guard.is_none() {
            *guard = Some(result);
        }
        drop(guard);
        self.ready.notify_all();
    }
}

/// Create a connected completer/handle pair.
pub fn completion<T>() -> (Completer<T>, CompletionHandle<T>) {
    let slot = Arc::new(Slot {
        result: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        CompletionHandle { slot },
    )
}

/// The write side of a completion slot. Resolves it exactly once.
pub struct Completer<T = ()> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    /// Write the result and wake every waiter.
    pub fn resolve(mut self, result: Result<T, GpuError>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(result);
        }
    }

    /// Whether any handle is still alive to observe the result.
    pub fn is_observed(&self) -> bool {
        self.slot
            .as_ref()
            .map(|slot| Arc::strong_count(slot) > 1)
            .unwrap_or(false)
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(GpuError::Abandoned));
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("observed", &self.is_observed())
            .finish()
    }
}

/// The read side of a completion slot.
///
/// Cloning yields another handle to the same slot.
pub struct CompletionHandle<T = ()> {
    slot: Arc<Slot<T>>,
}

// Compile-time assertion: handles cross threads freely.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<CompletionHandle<()>>();
    assert::<Completer<()>>();
};

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone> CompletionHandle<T> {
    /// A handle that is already resolved with `result`.
    pub fn resolved(result: Result<T, GpuError>) -> Self {
        let (completer, handle) = completion();
        completer.resolve(result);
        handle
    }

    /// Block until the slot is resolved and return a copy of the result.
    pub fn wait(&self) -> Result<T, GpuError> {
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            self.slot.ready.wait(&mut guard);
        }
    }

    /// Block for at most `timeout`. `None` if still unresolved.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, GpuError>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return Some(result.clone());
            }
            if self.slot.ready.wait_until(&mut guard, deadline).timed_out() {
                return guard.as_ref().cloned();
            }
        }
    }

    /// Non-blocking: the result if already resolved.
    pub fn poll(&self) -> Option<Result<T, GpuError>> {
        self.slot.result.lock().as_ref().cloned()
    }
}

impl<T> CompletionHandle<T> {
    /// Whether the slot has been written.
    pub fn is_complete(&self) -> bool {
        self.slot.result.lock().is_some()
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}
