//! Error type of the engine root.

use thiserror::Error;

use cacao_core::{LifecycleError, QueueError};
use cacao_gpu::ModuleError;

use crate::config::ConfigError;
use crate::scheduler::SchedulerError;

/// Everything that can go wrong bringing the engine up or down.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A stage was called in the wrong engine state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// A backend module failed or was driven out of order.
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// The command queue refused an operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The tick scheduler failed to start or stop.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// Every backend in the preference order failed to initialize or
    /// connect.
    #[error("no usable backend (tried: {})", .tried.join(", "))]
    NoUsableBackend {
        /// Backend names in the order they were tried.
        tried: Vec<String>,
    },
    /// An engine thread could not be spawned.
    #[error("failed to spawn {thread}: {reason}")]
    Spawn {
        /// Thread name.
        thread: &'static str,
        /// OS error text.
        reason: String,
    },
    /// An engine thread panicked.
    #[error("{thread} panicked")]
    Panicked {
        /// Thread name.
        thread: &'static str,
    },
}
