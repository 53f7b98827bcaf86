//! GPU command submission for the Cacao engine.
//!
//! Callers record a [`CommandBuffer`], hand it to a [`CommandQueue`] and
//! get back a [`CompletionHandle`](cacao_core::CompletionHandle). The
//! queue runs one of two execution models, fixed by the
//! [`Backend`] variant its module was registered with:
//!
//! - **immediate**: one worker thread owns the graphics context and runs
//!   buffers in FIFO order;
//! - **queued**: buffers go to a hardware queue with a fence and several
//!   frames may be in flight.
//!
//! The [`SurfaceManager`] regenerates the swapchain on resize or when
//! present/acquire reports "out of date", always with the device idle.
//! [`BackendModule`]s wrap backends in a strict lifecycle and live in a
//! [`ModuleRegistry`] keyed by id.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod command;
pub mod device;
pub mod headless;
mod immediate;
pub mod module;
pub mod queue;
mod queued;
pub mod registry;
pub mod surface;
mod worker;

pub use command::{BufferStatus, Command, CommandBuffer, CommandList, CommandState, HostFn};
pub use device::{
    AcquireError, DepthFormat, Extent2D, ImmediateDevice, PresentMode, QueuedDevice, SurfaceCaps,
    SurfaceDevice, SurfaceSource, SwapchainDesc,
};
pub use headless::{HeadlessImmediate, HeadlessQueued, HeadlessSurface};
pub use module::{Backend, BackendModule, ConnectOptions, ImmediateBackend, ModuleError, QueuedBackend};
pub use queue::CommandQueue;
pub use registry::ModuleRegistry;
pub use surface::{FrameTarget, SurfaceManager, ACQUIRE_RETRIES};
