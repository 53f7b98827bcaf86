//! Runtime orchestration for the Cacao engine.
//!
//! Three long-lived loops run concurrently once the engine is up:
//!
//! - the [`TickScheduler`] thread, which owns the simulation and runs
//!   fixed ticks on a drift-corrected cadence with dynamic ticks in the
//!   gaps;
//! - the GPU worker behind the [`CommandQueue`](cacao_gpu::CommandQueue);
//! - the [`FrameProcessor`] thread, which reads the simulation through
//!   the [`SnapshotReader`] handshake and submits one command buffer per
//!   frame.
//!
//! The [`Engine`] context root creates, connects, and tears them down in
//! order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod scheduler;
pub mod snapshot;
pub mod tick;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineState};
pub use error::EngineError;
pub use frame::{FrameParts, FramePipeline, FrameProcessor, FrameStats, DEFAULT_FRAMES_IN_FLIGHT};
pub use scheduler::{SchedulerError, TickScheduler, TickStats};
pub use snapshot::{SnapshotError, SnapshotReader};
pub use tick::{FixedDecision, TickClock};
