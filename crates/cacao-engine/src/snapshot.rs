//! Snapshot handshake between the tick scheduler and one reader.
//!
//! Three signals: an atomic `requested` flag, a `grant` and a `done`
//! one-shot, each a bounded(1) crossbeam channel. The scheduler holds the
//! simulation mutex for its whole run and only lets go of it between
//! sending `grant` and receiving `done`, at the top of a loop iteration.
//! A reader therefore never sees a tick half-applied, and the scheduler
//! is blocked only while the reader copies what it needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use cacao_core::CancellationToken;

/// How often a blocked side re-checks for shutdown.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Why a snapshot read did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The scheduler was not running when the read was requested.
    #[error("tick scheduler is not running")]
    NotRunning,
    /// The scheduler stopped while the reader waited for its grant.
    #[error("tick scheduler stopped before granting the snapshot")]
    Stopped,
}

// ── Handshake ────────────────────────────────────────────────────

/// Signals shared by one scheduler and its reader.
pub(crate) struct Handshake {
    requested: AtomicBool,
    running: AtomicBool,
    grant_tx: Sender<()>,
    grant_rx: Receiver<()>,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
    /// Token of the current scheduler run, to cut its sleep short.
    waker: Mutex<Option<CancellationToken>>,
}

impl Handshake {
    pub(crate) fn new() -> Self {
        let (grant_tx, grant_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        Self {
            requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            grant_tx,
            grant_rx,
            done_tx,
            done_rx,
            waker: Mutex::new(None),
        }
    }

    /// Mark the scheduler running and discard signals left over from an
    /// interrupted exchange in the previous run.
    pub(crate) fn open(&self, waker: CancellationToken) {
        while self.grant_rx.try_recv().is_ok() {}
        while self.done_rx.try_recv().is_ok() {}
        self.requested.store(false, Ordering::Release);
        *self.waker.lock() = Some(waker);
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        self.running.store(false, Ordering::Release);
        *self.waker.lock() = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Scheduler side: release `grant`, then block until `done`.
    ///
    /// Returns false if no exchange completed (the reader was already
    /// granted, or `token` was cancelled while waiting).
    pub(crate) fn serve(&self, token: &CancellationToken) -> bool {
        if self.grant_tx.try_send(()).is_err() {
            return false;
        }
        loop {
            match self.done_rx.recv_timeout(WAIT_SLICE) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn request(&self) {
        self.requested.store(true, Ordering::Release);
        if let Some(token) = self.waker.lock().as_ref() {
            token.wake();
        }
    }

    fn await_grant(&self) -> Result<(), SnapshotError> {
        loop {
            match self.grant_rx.recv_timeout(WAIT_SLICE) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if !self.is_running() {
                        self.requested.store(false, Ordering::Release);
                        return Err(SnapshotError::Stopped);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(SnapshotError::Stopped),
            }
        }
    }

    fn finish(&self) {
        self.requested.store(false, Ordering::Release);
        // Capacity 1 and one exchange at a time: never full here.
        let _ = self.done_tx.try_send(());
    }
}

/// Sends `done` when dropped, so an exchange always completes.
struct FinishOnDrop<'a>(&'a Handshake);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

// ── SnapshotReader ───────────────────────────────────────────────

/// The single reader side of a scheduler's snapshot handshake.
///
/// Obtained once from
/// [`TickScheduler::snapshot_reader()`](crate::TickScheduler::snapshot_reader).
pub struct SnapshotReader<S> {
    handshake: Arc<Handshake>,
    state: Arc<Mutex<S>>,
}

// Compile-time assertion: a reader can move to the render thread.
const _: fn() = || {
    fn assert<T: Send>() {}
    assert::<SnapshotReader<Vec<u64>>>();
};

impl<S> SnapshotReader<S> {
    pub(crate) fn new(handshake: Arc<Handshake>, state: Arc<Mutex<S>>) -> Self {
        Self { handshake, state }
    }

    /// Run `f` against the simulation state between two ticks.
    ///
    /// Blocks until the scheduler reaches the top of its next loop
    /// iteration; the scheduler stays blocked until `f` returns, so `f`
    /// should copy out what it needs and nothing more.
    pub fn read<R>(&mut self, f: impl FnOnce(&S) -> R) -> Result<R, SnapshotError> {
        if !self.handshake.is_running() {
            return Err(SnapshotError::NotRunning);
        }
        self.handshake.request();
        self.handshake.await_grant()?;
        // Releases the scheduler even if `f` unwinds.
        let _done = FinishOnDrop(&*self.handshake);
        let state = self.state.lock();
        Ok(f(&state))
    }

    /// Whether the scheduler is currently running.
    pub fn is_live(&self) -> bool {
        self.handshake.is_running()
    }
}

impl<S> std::fmt::Debug for SnapshotReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("live", &self.is_live())
            .finish()
    }
}
