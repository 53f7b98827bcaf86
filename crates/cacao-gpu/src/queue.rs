//! User-facing [`CommandQueue`] over the two execution models.
//!
//! # Architecture
//!
//! ```text
//! Caller thread(s)                 GPU worker ("cacao-gpu-*")
//!     |                                  |
//!     |--submit(buf)                     |
//!     |   kind check (fail fast)         |
//!     |   Immediate: push FIFO --------->| pop, execute, present, resolve
//!     |   Queued: device.submit + fence  | poll fences, resolve, retire
//!     |<--CompletionHandle               |
//!     |                                  |
//!     |--set_vsync(v) / notify_resize -->| regenerate surface next iteration
//! ```
//!
//! The model is chosen once, when the queue is built by its backend
//! module, and is fixed for the queue's lifetime.

use std::sync::Arc;

use parking_lot::Mutex;

use cacao_core::{
    completion, BackendKind, BufferId, Completer, CompletionHandle, GpuError, LifecycleError,
    QueueError, SurfaceGeneration,
};

use crate::command::{transition, BufferParts, CommandBuffer, CommandState, StateCell};
use crate::device::{Extent2D, ImmediateDevice, QueuedDevice, SurfaceSource};
use crate::immediate::ImmediateQueue;
use crate::queued::QueuedQueue;
use crate::surface::FrameTarget;

pub(crate) const COMPONENT: &str = "command queue";

// ── Ticket ───────────────────────────────────────────────────────

/// Queue-side bookkeeping for one accepted buffer.
pub(crate) struct Ticket {
    id: BufferId,
    cell: Arc<StateCell>,
    completer: Completer<()>,
    detached: bool,
}

impl Ticket {
    /// Accept a buffer: move it to `Submitted` and hand out its handle.
    pub fn accept(
        id: BufferId,
        cell: Arc<StateCell>,
        detached: bool,
    ) -> (Ticket, CompletionHandle<()>) {
        transition(id, &cell, CommandState::Submitted);
        let (completer, handle) = completion();
        (
            Ticket {
                id,
                cell,
                completer,
                detached,
            },
            handle,
        )
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The executor has picked the buffer up.
    pub fn executing(&self) {
        transition(self.id, &self.cell, CommandState::Executing);
    }

    /// The executor is done with the buffer.
    pub fn complete(self, result: Result<(), GpuError>) {
        transition(self.id, &self.cell, CommandState::Complete);
        self.resolve(result);
    }

    /// The buffer will never execute.
    pub fn reject(self, error: GpuError) {
        self.resolve(Err(error));
    }

    fn resolve(self, result: Result<(), GpuError>) {
        if let Err(e) = &result {
            if self.detached {
                tracing::warn!(buffer = %self.id, error = %e, "detached command buffer failed");
            } else {
                tracing::debug!(buffer = %self.id, error = %e, "command buffer failed");
            }
        }
        self.completer.resolve(result);
    }
}

// ── VsyncRequest ─────────────────────────────────────────────────

#[derive(Debug)]
struct VsyncState {
    applied: bool,
    pending: Option<bool>,
}

/// A vsync change recorded by callers and applied by the worker.
#[derive(Debug)]
pub(crate) struct VsyncRequest {
    state: Mutex<VsyncState>,
}

impl VsyncRequest {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(VsyncState {
                applied: initial,
                pending: None,
            }),
        }
    }

    /// Record `vsync`. Returns `false` if it matches the effective value.
    pub fn request(&self, vsync: bool) -> bool {
        let mut state = self.state.lock();
        if state.pending.unwrap_or(state.applied) == vsync {
            return false;
        }
        state.pending = Some(vsync);
        true
    }

    /// Take the pending change, if any.
    pub fn take(&self) -> Option<bool> {
        self.state.lock().pending.take()
    }

    pub fn mark_applied(&self, vsync: bool) {
        self.state.lock().applied = vsync;
    }

    /// The value callers will observe once pending changes apply.
    pub fn effective(&self) -> bool {
        let state = self.state.lock();
        state.pending.unwrap_or(state.applied)
    }
}

// ── CommandQueue ─────────────────────────────────────────────────

enum QueueModel {
    Immediate(ImmediateQueue),
    Queued(QueuedQueue),
}

/// Executes command buffers for one connected backend.
///
/// All methods take `&self`; the queue is shared behind an `Arc` by the
/// backend module that created it and by the frame pipeline.
pub struct CommandQueue {
    model: QueueModel,
}

// Compile-time assertion: CommandQueue must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<CommandQueue>();
};

impl CommandQueue {
    /// Queue for a single-context device. The surface is created by the
    /// worker once the context is current.
    pub fn immediate(
        device: Box<dyn ImmediateDevice>,
        source: Arc<dyn SurfaceSource>,
        vsync: bool,
    ) -> Self {
        Self {
            model: QueueModel::Immediate(ImmediateQueue::new(device, source, vsync)),
        }
    }

    /// Queue for a fenced hardware-queue device. Creates the surface
    /// immediately.
    ///
    /// `max_frames_in_flight` caps outstanding render targets; `None`
    /// means one per swapchain image.
    pub fn queued(
        device: Box<dyn QueuedDevice>,
        source: Arc<dyn SurfaceSource>,
        vsync: bool,
        max_frames_in_flight: Option<usize>,
    ) -> Result<Self, GpuError> {
        Ok(Self {
            model: QueueModel::Queued(QueuedQueue::new(
                device,
                source,
                vsync,
                max_frames_in_flight,
            )?),
        })
    }

    /// The execution model.
    pub fn kind(&self) -> BackendKind {
        match &self.model {
            QueueModel::Immediate(_) => BackendKind::Immediate,
            QueueModel::Queued(_) => BackendKind::Queued,
        }
    }

    /// Start the GPU worker.
    ///
    /// The immediate model returns only once its worker owns the
    /// context; if binding the context fails, the error is returned and
    /// the queue stays stopped.
    pub fn start(&self) -> Result<(), QueueError> {
        match &self.model {
            QueueModel::Immediate(q) => q.start(),
            QueueModel::Queued(q) => q.start(),
        }
    }

    /// Stop the GPU worker and wait for it to exit.
    ///
    /// Work already handed to the device finishes first. Immediate-model
    /// buffers still waiting in the FIFO resolve with
    /// [`GpuError::ShuttingDown`].
    pub fn stop(&self) -> Result<(), QueueError> {
        match &self.model {
            QueueModel::Immediate(q) => q.stop(),
            QueueModel::Queued(q) => q.stop(),
        }
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        match &self.model {
            QueueModel::Immediate(q) => q.is_running(),
            QueueModel::Queued(q) => q.is_running(),
        }
    }

    /// An empty buffer recorded for this queue's model.
    pub fn create_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(self.kind())
    }

    /// Submit a buffer and get a handle to its outcome.
    ///
    /// A buffer recorded for the other model is refused with
    /// [`QueueError::BackendMismatch`] and never executed.
    pub fn submit(&self, buffer: CommandBuffer) -> Result<CompletionHandle<()>, QueueError> {
        self.enqueue(buffer, false)
    }

    /// Submit without keeping a handle. Execution failures are logged,
    /// never returned; refusals (mismatch, not running) still are.
    pub fn submit_detached(&self, buffer: CommandBuffer) -> Result<(), QueueError> {
        self.enqueue(buffer, true).map(drop)
    }

    fn enqueue(
        &self,
        buffer: CommandBuffer,
        detached: bool,
    ) -> Result<CompletionHandle<()>, QueueError> {
        let expected = self.kind();
        if buffer.kind() != expected {
            tracing::error!(
                buffer = %buffer.id(),
                %expected,
                found = %buffer.kind(),
                "command buffer submitted to the wrong backend"
            );
            return Err(QueueError::BackendMismatch {
                expected,
                found: buffer.kind(),
            });
        }
        let parts: BufferParts = buffer.into_parts();
        match &self.model {
            QueueModel::Immediate(q) => q.submit(parts, detached),
            QueueModel::Queued(q) => q.submit(parts, detached),
        }
    }

    /// Request a vsync change. Applied by the worker on its next
    /// iteration; unchanged values are a no-op.
    pub fn set_vsync(&self, vsync: bool) -> Result<(), LifecycleError> {
        if !self.is_running() {
            return Err(LifecycleError::NotRunning {
                component: COMPONENT,
            });
        }
        let changed = match &self.model {
            QueueModel::Immediate(q) => q.vsync().request(vsync),
            QueueModel::Queued(q) => q.vsync().request(vsync),
        };
        if changed {
            tracing::debug!(vsync, "vsync change requested");
            match &self.model {
                QueueModel::Immediate(q) => q.wake(),
                QueueModel::Queued(q) => q.wake(),
            }
        }
        Ok(())
    }

    /// Vsync setting including any pending change.
    pub fn vsync(&self) -> bool {
        match &self.model {
            QueueModel::Immediate(q) => q.vsync().effective(),
            QueueModel::Queued(q) => q.vsync().effective(),
        }
    }

    /// Acquire a render target for the next frame.
    ///
    /// `Ok(None)` means skip this frame: every frame-in-flight slot is
    /// busy, or (immediate model) the surface does not exist yet.
    pub fn acquire_frame(&self) -> Result<Option<FrameTarget>, QueueError> {
        match &self.model {
            QueueModel::Immediate(q) => q.acquire_frame(),
            QueueModel::Queued(q) => q.acquire_frame(),
        }
    }

    /// The window was resized; regenerate on the next worker iteration.
    pub fn notify_resize(&self) {
        match &self.model {
            QueueModel::Immediate(q) => q.request_regeneration(),
            QueueModel::Queued(q) => q.request_regeneration(),
        }
    }

    /// Regenerate the surface at `extent` (or the window's current size)
    /// and wait for it.
    pub fn regenerate_surface(
        &self,
        extent: Option<Extent2D>,
    ) -> Result<SurfaceGeneration, QueueError> {
        match &self.model {
            QueueModel::Immediate(q) => q.regenerate(extent),
            QueueModel::Queued(q) => q.regenerate(extent),
        }
    }

    /// Current surface generation.
    pub fn surface_generation(&self) -> SurfaceGeneration {
        match &self.model {
            QueueModel::Immediate(q) => q.generation(),
            QueueModel::Queued(q) => q.generation(),
        }
    }

    /// Buffers accepted but not yet resolved.
    pub fn pending(&self) -> usize {
        match &self.model {
            QueueModel::Immediate(q) => q.pending(),
            QueueModel::Queued(q) => q.pending(),
        }
    }

    /// Stop the worker if needed, destroy the surface and drop the
    /// device. Later submissions fail.
    pub(crate) fn disconnect(&self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "stopping command queue during disconnect");
            }
        }
        match &self.model {
            QueueModel::Immediate(q) => q.disconnect(),
            QueueModel::Queued(q) => q.disconnect(),
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "stopping command queue on drop");
            }
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("kind", &self.kind())
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_request_ignores_unchanged_values() {
        let req = VsyncRequest::new(true);
        assert!(!req.request(true));
        assert!(req.request(false));
        assert!(!req.request(false));
        assert!(!req.effective());
        assert_eq!(req.take(), Some(false));
        req.mark_applied(false);
        assert_eq!(req.take(), None);
        assert!(!req.effective());
        assert!(req.request(true));
    }

    #[test]
    fn ticket_walks_states_in_order() {
        let buf = CommandBuffer::new(BackendKind::Queued);
        let status = buf.status();
        let parts = buf.into_parts();
        let (ticket, handle) = Ticket::accept(parts.id, parts.cell, false);
        assert_eq!(status.state(), CommandState::Submitted);
        ticket.executing();
        assert_eq!(handle.poll(), None);
        ticket.complete(Ok(()));
        assert_eq!(handle.wait(), Ok(()));
        assert_eq!(
            status.history().as_slice(),
            &[
                CommandState::Recording,
                CommandState::Submitted,
                CommandState::Executing,
                CommandState::Complete
            ]
        );
    }

    #[test]
    fn rejected_ticket_stays_submitted() {
        let buf = CommandBuffer::new(BackendKind::Immediate);
        let status = buf.status();
        let parts = buf.into_parts();
        let (ticket, handle) = Ticket::accept(parts.id, parts.cell, true);
        ticket.reject(GpuError::ShuttingDown);
        assert_eq!(handle.wait(), Err(GpuError::ShuttingDown));
        assert_eq!(status.state(), CommandState::Submitted);
    }
}
