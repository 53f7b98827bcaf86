//! Cacao: fixed/dynamic tick scheduling and GPU command submission for
//! real-time engines.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Cacao sub-crates. For most users, adding `cacao` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cacao::prelude::*;
//! use cacao::gpu::{Extent2D, HeadlessSurface};
//!
//! #[derive(Default)]
//! struct Counter {
//!     fixed: u64,
//! }
//!
//! impl Simulation for Counter {
//!     fn fixed_tick(&mut self, _interval: Duration) {
//!         self.fixed += 1;
//!     }
//!     fn dynamic_tick(&mut self, _timestep: Duration) {}
//! }
//!
//! struct Clear;
//! impl FramePipeline<Counter> for Clear {
//!     fn extract(&mut self, _state: &Counter) {}
//!     fn record(&mut self, buffer: &mut CommandBuffer) {
//!         buffer.begin_rendering([0.0, 0.0, 0.0, 1.0]).end_rendering();
//!     }
//! }
//!
//! let config = EngineConfig {
//!     fixed_tick_interval: Duration::from_millis(5),
//!     ..EngineConfig::default()
//! };
//! let surface = Arc::new(HeadlessSurface::new(Extent2D::new(640, 480)));
//! let mut engine: Engine<Counter> = Engine::headless(config, surface).unwrap();
//!
//! engine.core_init(Counter::default(), SystemClock::new()).unwrap();
//! engine.gfx_init(Box::new(Clear)).unwrap();
//! engine.run().unwrap();
//! std::thread::sleep(Duration::from_millis(50));
//! let ticks = engine.quit().unwrap();
//! engine.gfx_shutdown().unwrap();
//!
//! let counter = engine.core_shutdown().unwrap().unwrap();
//! assert_eq!(counter.fixed, ticks.fixed);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `cacao-core` | IDs, errors, clocks, cancellation, completion handles, `Simulation` |
//! | [`gpu`] | `cacao-gpu` | Command buffers, command queues, surfaces, backend modules |
//! | [`engine`] | `cacao-engine` | Tick scheduler, snapshot handshake, frame processor, engine root |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`cacao-core`).
///
/// Contains the error taxonomy, the [`types::Clock`] used for tick
/// timing, [`types::CancellationToken`], [`types::CompletionHandle`] and
/// the [`types::Simulation`] trait.
pub use cacao_core as types;

/// GPU command submission (`cacao-gpu`).
///
/// Record a [`gpu::CommandBuffer`], submit it to a [`gpu::CommandQueue`]
/// and wait on the returned handle. Backends live in a
/// [`gpu::ModuleRegistry`]; [`gpu::HeadlessQueued`] and
/// [`gpu::HeadlessImmediate`] run without a real device.
pub use cacao_gpu as gpu;

/// Runtime orchestration (`cacao-engine`).
///
/// [`engine::TickScheduler`] runs the simulation, [`engine::FrameProcessor`]
/// turns snapshots into command buffers, and [`engine::Engine`] brings both
/// up and down in order.
pub use cacao_engine as engine;

/// Common imports for typical Cacao usage.
///
/// ```rust
/// use cacao::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use cacao_core::{
        BackendKind, CancellationToken, Clock, CompletionHandle, Simulation, SystemClock,
        Timestamp,
    };

    // Errors
    pub use cacao_core::{GpuError, LifecycleError, QueueError};

    // GPU
    pub use cacao_gpu::{Backend, CommandBuffer, CommandQueue, ModuleRegistry, SurfaceSource};

    // Engine
    pub use cacao_engine::{
        Engine, EngineConfig, EngineError, EngineState, FramePipeline, SnapshotReader,
        TickScheduler, TickStats,
    };
}
