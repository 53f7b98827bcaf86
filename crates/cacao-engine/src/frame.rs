//! The frame processor: the render-side loop.
//!
//! Runs on its own thread (`cacao-frame`). Each frame it reads the
//! simulation through the snapshot handshake, acquires a render target,
//! has the [`FramePipeline`] record a command buffer, and submits it.
//! Completion handles of submitted frames are kept in submission order;
//! once `max_frames_in_flight` are outstanding, the loop waits on the
//! oldest before starting another frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cacao_core::{CancellationToken, CompletionHandle};
use cacao_gpu::{CommandBuffer, CommandQueue};

use crate::error::EngineError;
use crate::snapshot::{SnapshotError, SnapshotReader};

/// Outstanding frames when the configuration leaves it open.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 3;

/// How long the loop parks when there is nothing to render.
const IDLE_PARK: Duration = Duration::from_millis(1);

/// Slice used while waiting on a frame handle, so stop stays prompt.
const HANDLE_WAIT: Duration = Duration::from_millis(5);

/// Turns simulation state into GPU commands.
///
/// `extract` runs inside the snapshot window and should only copy;
/// `record` runs afterwards with the scheduler already ticking again.
pub trait FramePipeline<S>: Send + 'static {
    /// Copy what the next frame needs out of the simulation.
    fn extract(&mut self, state: &S);

    /// Record the frame. The buffer already targets the acquired image.
    fn record(&mut self, buffer: &mut CommandBuffer);
}

/// Frame counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted.
    pub frames: u64,
    /// Frames skipped because no render target was available.
    pub skipped: u64,
    /// Frames that failed (acquisition, submission, or execution).
    pub failed: u64,
}

#[derive(Default)]
struct FrameCounters {
    frames: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl FrameCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FrameStats {
        FrameStats {
            frames: self.frames.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// What the frame thread hands back when it stops.
pub struct FrameParts<S> {
    /// The snapshot reader, reusable by the next processor.
    pub reader: SnapshotReader<S>,
    /// The pipeline, with whatever state it accumulated.
    pub pipeline: Box<dyn FramePipeline<S>>,
    /// Final counters.
    pub stats: FrameStats,
}

/// Handle to a running frame thread.
pub struct FrameProcessor<S> {
    token: CancellationToken,
    thread: JoinHandle<(SnapshotReader<S>, Box<dyn FramePipeline<S>>)>,
    counters: Arc<FrameCounters>,
}

impl<S: Send + 'static> FrameProcessor<S> {
    /// Spawn the frame thread.
    pub fn spawn(
        reader: SnapshotReader<S>,
        pipeline: Box<dyn FramePipeline<S>>,
        queue: Arc<CommandQueue>,
        max_frames_in_flight: Option<usize>,
    ) -> Result<Self, EngineError> {
        let token = CancellationToken::new();
        let counters = Arc::new(FrameCounters::default());
        let state = FrameLoop {
            reader,
            pipeline,
            queue,
            max_in_flight: max_frames_in_flight
                .unwrap_or(DEFAULT_FRAMES_IN_FLIGHT)
                .max(1),
            in_flight: VecDeque::new(),
            counters: Arc::clone(&counters),
            token: token.clone(),
        };
        let thread = thread::Builder::new()
            .name("cacao-frame".into())
            .spawn(move || state.run())
            .map_err(|e| EngineError::Spawn {
                thread: "cacao-frame",
                reason: e.to_string(),
            })?;
        Ok(Self {
            token,
            thread,
            counters,
        })
    }

    /// Live counters.
    pub fn stats(&self) -> FrameStats {
        self.counters.snapshot()
    }

    /// Stop after the current frame and take the loop's parts back.
    ///
    /// Frames still in flight are left to the queue, which resolves
    /// them when it drains.
    pub fn stop(self) -> Result<FrameParts<S>, EngineError> {
        self.token.cancel();
        let (reader, pipeline) = self.thread.join().map_err(|_| EngineError::Panicked {
            thread: "cacao-frame",
        })?;
        let stats = self.counters.snapshot();
        tracing::debug!(
            frames = stats.frames,
            skipped = stats.skipped,
            failed = stats.failed,
            "frame processor stopped"
        );
        Ok(FrameParts {
            reader,
            pipeline,
            stats,
        })
    }
}

impl<S> std::fmt::Debug for FrameProcessor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

// ── Loop ─────────────────────────────────────────────────────────

struct FrameLoop<S> {
    reader: SnapshotReader<S>,
    pipeline: Box<dyn FramePipeline<S>>,
    queue: Arc<CommandQueue>,
    max_in_flight: usize,
    in_flight: VecDeque<CompletionHandle<()>>,
    counters: Arc<FrameCounters>,
    token: CancellationToken,
}

impl<S: Send + 'static> FrameLoop<S> {
    fn run(mut self) -> (SnapshotReader<S>, Box<dyn FramePipeline<S>>) {
        self.token.register_current_thread();
        tracing::debug!(max_in_flight = self.max_in_flight, "frame processor started");
        while !self.token.is_cancelled() {
            self.frame();
        }
        (self.reader, self.pipeline)
    }

    fn frame(&mut self) {
        let pipeline = &mut self.pipeline;
        match self.reader.read(|state| pipeline.extract(state)) {
            Ok(()) => {}
            Err(SnapshotError::NotRunning | SnapshotError::Stopped) => {
                // Simulation paused: nothing new to draw.
                thread::park_timeout(IDLE_PARK);
                return;
            }
        }

        let target = match self.queue.acquire_frame() {
            Ok(Some(target)) => target,
            Ok(None) => {
                FrameCounters::bump(&self.counters.skipped);
                if !self.retire_oldest() {
                    thread::park_timeout(IDLE_PARK);
                }
                return;
            }
            Err(error) => {
                FrameCounters::bump(&self.counters.failed);
                tracing::warn!(%error, "frame dropped: no render target");
                thread::park_timeout(IDLE_PARK);
                return;
            }
        };

        let mut buffer = self.queue.create_buffer();
        buffer.set_target(target);
        self.pipeline.record(&mut buffer);
        match self.queue.submit(buffer) {
            Ok(handle) => {
                FrameCounters::bump(&self.counters.frames);
                self.in_flight.push_back(handle);
            }
            Err(error) => {
                FrameCounters::bump(&self.counters.failed);
                tracing::warn!(%error, "frame submission refused");
            }
        }

        while self.in_flight.len() >= self.max_in_flight {
            if !self.retire_oldest() {
                break;
            }
        }
    }

    /// Wait for the oldest outstanding frame. Returns false if there
    /// was none, or stop was requested while waiting.
    fn retire_oldest(&mut self) -> bool {
        let Some(oldest) = self.in_flight.front() else {
            return false;
        };
        loop {
            if let Some(result) = oldest.wait_timeout(HANDLE_WAIT) {
                if let Err(error) = result {
                    FrameCounters::bump(&self.counters.failed);
                    tracing::warn!(%error, "frame failed on the device");
                }
                self.in_flight.pop_front();
                return true;
            }
            if self.token.is_cancelled() {
                return false;
            }
        }
    }
}
