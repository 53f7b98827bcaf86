//! Benchmark profiles and helpers for the Cacao engine runtime.
//!
//! - [`headless_queue`]: a started command queue on a headless backend
//! - [`frame_buffer`]: a small buffer shaped like one recorded frame
//! - [`reference_config`] / [`stress_config`]: scheduler cadences

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;
use std::time::Duration;

use cacao_core::{BackendKind, GpuError};
use cacao_engine::EngineConfig;
use cacao_gpu::{
    CommandBuffer, CommandQueue, Extent2D, HeadlessImmediate, HeadlessQueued, HeadlessSurface,
    ImmediateBackend, QueuedBackend, SurfaceSource,
};

/// Connect a headless backend of the given model and start its queue.
///
/// The caller stops the queue when done; dropping it also stops it.
pub fn headless_queue(
    kind: BackendKind,
    max_frames_in_flight: Option<usize>,
) -> Result<Arc<CommandQueue>, GpuError> {
    let source: Arc<dyn SurfaceSource> = Arc::new(HeadlessSurface::new(Extent2D::new(1280, 720)));
    let queue = match kind {
        BackendKind::Immediate => {
            let mut backend = HeadlessImmediate;
            backend.init()?;
            let device = backend.connect(&*source)?;
            CommandQueue::immediate(device, source, false)
        }
        BackendKind::Queued => {
            let mut backend = HeadlessQueued;
            backend.init()?;
            let device = backend.connect(&*source)?;
            CommandQueue::queued(device, source, false, max_frames_in_flight)?
        }
    };
    queue
        .start()
        .map_err(|e| GpuError::device(e.to_string()))?;
    Ok(Arc::new(queue))
}

/// A buffer with one render pass and `markers` debug markers.
pub fn frame_buffer(queue: &CommandQueue, markers: usize) -> CommandBuffer {
    let mut buffer = queue.create_buffer();
    buffer.begin_rendering([0.1, 0.1, 0.1, 1.0]);
    for _ in 0..markers {
        buffer.marker("draw");
    }
    buffer.end_rendering();
    buffer
}

/// 60 Hz fixed ticks with the default grace window.
pub fn reference_config() -> EngineConfig {
    EngineConfig {
        fixed_tick_interval: Duration::from_micros(16_667),
        ..EngineConfig::default()
    }
}

/// 1 kHz fixed ticks: the scheduler spends most of its time deciding.
pub fn stress_config() -> EngineConfig {
    EngineConfig {
        fixed_tick_interval: Duration::from_millis(1),
        grace_window: Duration::from_micros(100),
        ..EngineConfig::default()
    }
}
