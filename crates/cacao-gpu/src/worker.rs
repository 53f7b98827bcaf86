//! GPU worker thread plumbing shared by both execution models.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use cacao_core::{CancellationToken, QueueError};

/// Poll period of the queued worker while buffers are in flight.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_micros(250);

/// Longest a worker blocks with nothing to do before re-checking its
/// cancellation token and pending surface requests.
pub(crate) const IDLE_WAIT: Duration = Duration::from_millis(2);

/// A running worker thread and the token that stops it.
///
/// The loop body returns whatever state it owned (the immediate model
/// hands its graphics context back) so the queue can restart later.
pub(crate) struct WorkerHandle<R> {
    token: CancellationToken,
    thread: JoinHandle<R>,
}

impl<R: Send + 'static> WorkerHandle<R> {
    /// Spawn `body` on a named thread with a fresh token.
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self, QueueError>
    where
        F: FnOnce(CancellationToken) -> R + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                loop_token.register_current_thread();
                tracing::debug!(thread = name, "gpu worker started");
                let out = body(loop_token);
                tracing::debug!(thread = name, "gpu worker stopped");
                out
            })
            .map_err(|e| QueueError::Spawn {
                thread: name,
                reason: e.to_string(),
            })?;
        Ok(Self { token, thread })
    }

    /// The worker's token, for waking it early.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request a stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the loop to exit. `None` if it panicked.
    pub fn join(self) -> Option<R> {
        self.token.cancel();
        match self.thread.join() {
            Ok(out) => Some(out),
            Err(_) => {
                tracing::error!("gpu worker thread panicked");
                None
            }
        }
    }
}
