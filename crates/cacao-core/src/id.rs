//! Strongly-typed identifiers and small shared state enums.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a backend module within a module registry.
///
/// Dependents hold a `ModuleId` instead of a reference to the module,
/// and resolve it through the registry when they need the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ModuleId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Counter for unique [`BufferId`] allocation.
static BUFFER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique per-instance identifier for a command buffer.
///
/// Allocated from a monotonic atomic counter via [`BufferId::next`].
/// Used only for logging and diagnostics; ordering between buffers is
/// defined by submission order, not by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Allocate a fresh, unique buffer ID. Thread-safe.
    pub fn next() -> Self {
        Self(BUFFER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation counter of a presentable surface.
///
/// Bumped every time the swapchain is regenerated. Render targets
/// acquired under an older generation are rejected at submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceGeneration(pub u64);

impl SurfaceGeneration {
    /// The generation that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SurfaceGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a device fence signalled when a queued submission retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub u64);

impl fmt::Display for FenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a presentable image (or image view) owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The execution model of a rendering backend.
///
/// Chosen once, when a backend is registered. Command buffers are tagged
/// with the kind they were recorded for and are rejected by queues of the
/// other kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Single worker thread owning the graphics context; strictly
    /// sequential execution.
    Immediate,
    /// Hardware queue with fences; several buffers in flight at once.
    Queued,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Queued => write!(f, "queued"),
        }
    }
}

/// Lifecycle state of a backend module.
///
/// Legal transitions:
///
/// ```text
/// Uninitialized ──init──▶ Initialized ──connect──▶ Connected
///                              │                       │
///                              │                   disconnect
///                              │                       ▼
///                              └────────term────▶ Disconnected ──term──▶ Terminated
/// ```
///
/// (`term` is accepted from both `Initialized` and `Disconnected`.)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleState {
    /// Registered but no process-wide setup has happened.
    Uninitialized,
    /// Device/context objects exist; no presentable surface.
    Initialized,
    /// A live presentable surface and command queue exist.
    Connected,
    /// The surface has been released; only `term` remains legal.
    Disconnected,
    /// Torn down. The instance can never be initialized again.
    Terminated,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
