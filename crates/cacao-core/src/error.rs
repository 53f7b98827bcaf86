//! Error types shared across the Cacao runtime.
//!
//! Organized by failure class rather than by subsystem:
//!
//! - [`LifecycleError`]: a component was driven out of order. These are
//!   programmer errors; callers must not retry them.
//! - [`GpuError`]: the device, driver, or surface failed. Completion
//!   handles resolve with these, so they are `Clone`.
//! - [`QueueError`]: a command queue refused an operation, either
//!   because of a type mismatch, a lifecycle violation, or the device.
//!
//! Timing drift is not an error at all; the scheduler logs it.

use thiserror::Error;

use crate::id::{BackendKind, ModuleId, ModuleState, SurfaceGeneration};

/// A component was called in a state that does not permit the call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// `start` on a component that is already running.
    #[error("{component} is already running")]
    AlreadyRunning {
        /// The component that refused to start.
        component: &'static str,
    },
    /// `stop` (or a running-only operation) on a stopped component.
    #[error("{component} is not running")]
    NotRunning {
        /// The component that was not running.
        component: &'static str,
    },
    /// A backend module lifecycle method was called out of order.
    #[error("cannot {operation} backend module '{module}' while {state}")]
    ModuleTransition {
        /// Name of the module.
        module: String,
        /// The attempted operation (`init`, `connect`, ...).
        operation: &'static str,
        /// The state the module was in.
        state: ModuleState,
    },
    /// No module is registered under this id.
    #[error("no backend module registered with id {id}")]
    UnknownModule {
        /// The id that failed to resolve.
        id: ModuleId,
    },
    /// A module with this name is already registered.
    #[error("a backend module named '{name}' is already registered")]
    DuplicateModule {
        /// The conflicting name.
        name: String,
    },
    /// Another backend module already holds backend resources; only one
    /// may be initialized at a time.
    #[error("cannot init backend module '{requested}': '{active}' is still active")]
    ModuleActive {
        /// The module that is active.
        active: String,
        /// The module that was asked to initialize.
        requested: String,
    },
    /// The single snapshot reader of a scheduler was already handed out.
    #[error("the snapshot reader has already been taken")]
    ReaderTaken,
    /// An engine-root stage was invoked in the wrong engine state.
    #[error("cannot {operation} while the engine is {state}")]
    EngineState {
        /// The attempted stage.
        operation: &'static str,
        /// The state the engine was in.
        state: &'static str,
    },
}

/// A failure reported by (or on behalf of) a rendering device.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GpuError {
    /// The driver or OS reported a failure.
    #[error("device error: {reason}")]
    Device {
        /// Description of the failure.
        reason: String,
    },
    /// The surface stayed out of date after regeneration and one retry.
    #[error("surface is out of date after regeneration")]
    SurfaceOutOfDate,
    /// The device does not support a requested capability.
    #[error("unsupported: {what}")]
    Unsupported {
        /// The missing capability.
        what: String,
    },
    /// A render target was recorded against a surface that has since
    /// been regenerated; the buffer was not executed.
    #[error("render target from surface generation {target} is stale (current {current})")]
    StaleSurface {
        /// Generation the target was acquired from.
        target: SurfaceGeneration,
        /// Generation at submission time.
        current: SurfaceGeneration,
    },
    /// The queue was stopped before the buffer could execute.
    #[error("command queue is shutting down")]
    ShuttingDown,
    /// The queue no longer has a device (the module was disconnected).
    #[error("command queue is disconnected from its device")]
    Disconnected,
    /// The producing side dropped without resolving the handle.
    #[error("completion was abandoned without a result")]
    Abandoned,
}

impl GpuError {
    /// Shorthand for a [`GpuError::Device`] with the given reason.
    pub fn device(reason: impl Into<String>) -> Self {
        Self::Device {
            reason: reason.into(),
        }
    }
}

/// An operation refused by a command queue before any work was queued.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The buffer was recorded for another execution model.
    ///
    /// Indicates a caller bug; the buffer is dropped unexecuted.
    #[error("cannot submit a command buffer recorded for the {found} backend to the {expected} backend")]
    BackendMismatch {
        /// Kind of the queue.
        expected: BackendKind,
        /// Kind the buffer was recorded for.
        found: BackendKind,
    },
    /// The queue is not in a state that accepts work.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The device failed or is gone.
    #[error(transparent)]
    Gpu(#[from] GpuError),
    /// The worker thread could not be spawned.
    #[error("failed to spawn {thread} thread: {reason}")]
    Spawn {
        /// Name of the thread.
        thread: &'static str,
        /// The OS error.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_kinds() {
        let e = QueueError::BackendMismatch {
            expected: BackendKind::Queued,
            found: BackendKind::Immediate,
        };
        assert_eq!(
            e.to_string(),
            "cannot submit a command buffer recorded for the immediate backend to the queued backend"
        );
    }

    #[test]
    fn lifecycle_converts_into_queue_error() {
        let e: QueueError = LifecycleError::NotRunning {
            component: "command queue",
        }
        .into();
        assert!(matches!(e, QueueError::Lifecycle(_)));
        assert_eq!(e.to_string(), "command queue is not running");
    }

    #[test]
    fn module_transition_message() {
        let e = LifecycleError::ModuleTransition {
            module: "queued".into(),
            operation: "term",
            state: ModuleState::Connected,
        };
        assert_eq!(
            e.to_string(),
            "cannot term backend module 'queued' while connected"
        );
    }

    #[test]
    fn module_active_message_names_both_modules() {
        let e = LifecycleError::ModuleActive {
            active: "queued".into(),
            requested: "immediate".into(),
        };
        assert_eq!(
            e.to_string(),
            "cannot init backend module 'immediate': 'queued' is still active"
        );
    }
}
