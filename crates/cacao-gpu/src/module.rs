//! Backend modules: the closed set of backend variants and the strict
//! lifecycle state machine that wraps each one.
//!
//! ```text
//! Uninitialized --init--> Initialized --connect--> Connected
//!                              |                       |
//!                              |                   disconnect
//!                              |                       v
//!                              +------term------> Disconnected --term--> Terminated
//! ```
//!
//! Every method checks the state first and refuses out-of-order calls
//! with [`LifecycleError::ModuleTransition`]. A terminated module is
//! never reused; register a fresh one instead.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use cacao_core::{BackendKind, GpuError, LifecycleError, ModuleId, ModuleState, QueueError};

use crate::device::{ImmediateDevice, QueuedDevice, SurfaceSource};
use crate::queue::CommandQueue;

// ── Backend traits ───────────────────────────────────────────────

/// A backend whose device exposes one thread-bound context.
pub trait ImmediateBackend: Send {
    /// Process-wide setup (loading the API, creating the instance).
    fn init(&mut self) -> Result<(), GpuError>;

    /// Create a device bound to the window surface.
    fn connect(&mut self, source: &dyn SurfaceSource)
        -> Result<Box<dyn ImmediateDevice>, GpuError>;

    /// Process-wide teardown.
    fn term(&mut self);
}

/// A backend whose device has a hardware queue and fences.
pub trait QueuedBackend: Send {
    /// Process-wide setup (loading the API, creating the instance).
    fn init(&mut self) -> Result<(), GpuError>;

    /// Create a device bound to the window surface.
    fn connect(&mut self, source: &dyn SurfaceSource) -> Result<Box<dyn QueuedDevice>, GpuError>;

    /// Process-wide teardown.
    fn term(&mut self);
}

/// One rendering backend, tagged by execution model.
///
/// The variant decides which [`CommandQueue`] model the module builds on
/// connect; nothing dispatches on it per command.
pub enum Backend {
    /// Single context, sequential execution on one worker.
    Immediate(Box<dyn ImmediateBackend>),
    /// Hardware queue, several frames in flight.
    Queued(Box<dyn QueuedBackend>),
}

impl Backend {
    /// The execution model of this backend.
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Immediate(_) => BackendKind::Immediate,
            Backend::Queued(_) => BackendKind::Queued,
        }
    }

    fn init(&mut self) -> Result<(), GpuError> {
        match self {
            Backend::Immediate(b) => b.init(),
            Backend::Queued(b) => b.init(),
        }
    }

    fn term(&mut self) {
        match self {
            Backend::Immediate(b) => b.term(),
            Backend::Queued(b) => b.term(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

// ── Errors and options ───────────────────────────────────────────

/// Failure of a backend module operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// Called out of order.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The backend or device failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl From<QueueError> for ModuleError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Lifecycle(e) => ModuleError::Lifecycle(e),
            QueueError::Gpu(e) => ModuleError::Gpu(e),
            other => ModuleError::Gpu(GpuError::device(other.to_string())),
        }
    }
}

/// Parameters for [`BackendModule::connect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Initial vsync setting of the surface.
    pub vsync: bool,
    /// Cap on outstanding render targets (queued model only).
    pub max_frames_in_flight: Option<usize>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            vsync: true,
            max_frames_in_flight: None,
        }
    }
}

// ── BackendModule ────────────────────────────────────────────────

/// A registered backend and its lifecycle state.
pub struct BackendModule {
    id: ModuleId,
    name: String,
    state: ModuleState,
    backend: Backend,
    queue: Option<Arc<CommandQueue>>,
}

impl BackendModule {
    pub(crate) fn new(id: ModuleId, name: String, backend: Backend) -> Self {
        Self {
            id,
            name,
            state: ModuleState::Uninitialized,
            backend,
            queue: None,
        }
    }

    /// Registry key.
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Unique name ("queued", "immediate", ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Execution model of the wrapped backend.
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The queue built by the last `connect`, while connected.
    pub fn queue(&self) -> Option<&Arc<CommandQueue>> {
        self.queue.as_ref()
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ModuleState],
    ) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        tracing::error!(
            module = %self.name,
            operation,
            state = %self.state,
            "backend module lifecycle violation"
        );
        Err(LifecycleError::ModuleTransition {
            module: self.name.clone(),
            operation,
            state: self.state,
        })
    }

    fn set_state(&mut self, next: ModuleState) {
        tracing::debug!(module = %self.name, from = %self.state, to = %next, "backend module transition");
        self.state = next;
    }

    /// Process-wide backend setup. On failure the module stays
    /// uninitialized.
    ///
    /// Reached through [`ModuleRegistry::init`](crate::ModuleRegistry::init),
    /// which keeps at most one module active.
    pub(crate) fn init(&mut self) -> Result<(), ModuleError> {
        self.expect_state("init", &[ModuleState::Uninitialized])?;
        self.backend.init()?;
        self.set_state(ModuleState::Initialized);
        Ok(())
    }

    /// Create the device and its command queue against the window
    /// surface. The queue is returned stopped.
    pub fn connect(
        &mut self,
        source: Arc<dyn SurfaceSource>,
        options: ConnectOptions,
    ) -> Result<Arc<CommandQueue>, ModuleError> {
        self.expect_state("connect", &[ModuleState::Initialized])?;
        let queue = match &mut self.backend {
            Backend::Immediate(b) => {
                let device = b.connect(&*source)?;
                CommandQueue::immediate(device, source, options.vsync)
            }
            Backend::Queued(b) => {
                let device = b.connect(&*source)?;
                CommandQueue::queued(device, source, options.vsync, options.max_frames_in_flight)?
            }
        };
        let queue = Arc::new(queue);
        self.queue = Some(Arc::clone(&queue));
        self.set_state(ModuleState::Connected);
        tracing::info!(module = %self.name, kind = %self.kind(), "backend connected");
        Ok(queue)
    }

    /// Stop the queue if it runs, tear down the surface and drop the
    /// device.
    pub fn disconnect(&mut self) -> Result<(), ModuleError> {
        self.expect_state("disconnect", &[ModuleState::Connected])?;
        if let Some(queue) = self.queue.take() {
            queue.disconnect();
        }
        self.set_state(ModuleState::Disconnected);
        tracing::info!(module = %self.name, "backend disconnected");
        Ok(())
    }

    /// Process-wide backend teardown. Final.
    pub fn term(&mut self) -> Result<(), ModuleError> {
        self.expect_state("term", &[ModuleState::Initialized, ModuleState::Disconnected])?;
        self.backend.term();
        self.set_state(ModuleState::Terminated);
        Ok(())
    }
}

impl fmt::Debug for BackendModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendModule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessQueued, HeadlessSurface};
    use crate::device::Extent2D;

    struct FailingInit;

    impl ImmediateBackend for FailingInit {
        fn init(&mut self) -> Result<(), GpuError> {
            Err(GpuError::device("no driver"))
        }
        fn connect(
            &mut self,
            _source: &dyn SurfaceSource,
        ) -> Result<Box<dyn ImmediateDevice>, GpuError> {
            Err(GpuError::device("unreachable"))
        }
        fn term(&mut self) {}
    }

    fn surface() -> Arc<dyn SurfaceSource> {
        Arc::new(HeadlessSurface::new(Extent2D::new(64, 48)))
    }

    fn queued_module() -> BackendModule {
        BackendModule::new(
            ModuleId(1),
            "queued".into(),
            Backend::Queued(Box::new(HeadlessQueued::default())),
        )
    }

    #[test]
    fn full_lifecycle_in_order() {
        let mut m = queued_module();
        m.init().unwrap();
        let queue = m.connect(surface(), ConnectOptions::default()).unwrap();
        assert_eq!(m.state(), ModuleState::Connected);
        assert_eq!(queue.kind(), BackendKind::Queued);
        m.disconnect().unwrap();
        assert!(m.queue().is_none());
        m.term().unwrap();
        assert_eq!(m.state(), ModuleState::Terminated);
    }

    #[test]
    fn connect_before_init_fails_fast() {
        let mut m = queued_module();
        let err = m.connect(surface(), ConnectOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ModuleError::Lifecycle(LifecycleError::ModuleTransition {
                module: "queued".into(),
                operation: "connect",
                state: ModuleState::Uninitialized,
            })
        );
        assert_eq!(m.state(), ModuleState::Uninitialized);
    }

    #[test]
    fn term_while_connected_fails() {
        let mut m = queued_module();
        m.init().unwrap();
        m.connect(surface(), ConnectOptions::default()).unwrap();
        assert!(matches!(m.term(), Err(ModuleError::Lifecycle(_))));
        assert_eq!(m.state(), ModuleState::Connected);
    }

    #[test]
    fn term_straight_from_initialized() {
        let mut m = queued_module();
        m.init().unwrap();
        m.term().unwrap();
        assert!(m.init().is_err());
    }

    #[test]
    fn no_reconnect_after_disconnect() {
        let mut m = queued_module();
        m.init().unwrap();
        m.connect(surface(), ConnectOptions::default()).unwrap();
        m.disconnect().unwrap();
        assert!(m.connect(surface(), ConnectOptions::default()).is_err());
    }

    #[test]
    fn disconnect_stops_running_queue() {
        let mut m = queued_module();
        m.init().unwrap();
        let queue = m.connect(surface(), ConnectOptions::default()).unwrap();
        queue.start().unwrap();
        m.disconnect().unwrap();
        assert!(!queue.is_running());
        assert!(queue.start().is_err());
    }

    #[test]
    fn failed_init_stays_uninitialized() {
        let mut m = BackendModule::new(
            ModuleId(2),
            "broken".into(),
            Backend::Immediate(Box::new(FailingInit)),
        );
        assert_eq!(m.init(), Err(ModuleError::Gpu(GpuError::device("no driver"))));
        assert_eq!(m.state(), ModuleState::Uninitialized);
    }
}
