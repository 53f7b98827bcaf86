//! Core types and traits for the Cacao engine runtime.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the abstractions shared by the scheduler, the GPU submission system
//! and the test fixtures: identifiers, the error taxonomy, the [`Clock`]
//! used for all tick timing, the [`CancellationToken`] polled by every
//! long-lived loop, single-assignment [`CompletionHandle`]s, and the
//! [`Simulation`] trait that the tick scheduler drives.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod completion;
pub mod error;
pub mod id;
pub mod simulation;
pub mod time;

pub use cancel::CancellationToken;
pub use completion::{completion, Completer, CompletionHandle};
pub use error::{GpuError, LifecycleError, QueueError};
pub use id::{BackendKind, BufferId, FenceId, ImageId, ModuleId, ModuleState, SurfaceGeneration};
pub use simulation::Simulation;
pub use time::{Clock, SystemClock, Timestamp};
