//! Immediate execution model: one worker thread owns the graphics
//! context and runs buffers strictly in submission order.
//!
//! The FIFO and its `accepting` flag live behind the submission mutex.
//! The context (device plus surface) is moved into the worker thread on
//! start and handed back through the join handle on stop, so no lock
//! guards it while running.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use cacao_core::{
    completion, CancellationToken, Completer, CompletionHandle, GpuError, LifecycleError,
    QueueError, SurfaceGeneration,
};

use crate::command::{BufferParts, CommandList};
use crate::device::{AcquireError, Extent2D, ImmediateDevice, SurfaceSource};
use crate::queue::{Ticket, VsyncRequest, COMPONENT};
use crate::surface::{FrameTarget, SurfaceManager};
use crate::worker::{WorkerHandle, IDLE_WAIT};

const THREAD_NAME: &str = "cacao-gpu-immediate";

/// The graphics context, owned by exactly one thread at a time.
pub(crate) struct ImmediateContext {
    device: Box<dyn ImmediateDevice>,
    surface: SurfaceManager,
}

enum WorkItem {
    Execute {
        commands: CommandList,
        target: Option<FrameTarget>,
        ticket: Ticket,
    },
    Regenerate {
        extent: Option<Extent2D>,
        completer: Completer<SurfaceGeneration>,
    },
}

struct Fifo {
    items: VecDeque<WorkItem>,
    accepting: bool,
}

struct Shared {
    fifo: Mutex<Fifo>,
    available: Condvar,
    /// Mirror of the worker's surface generation, for `acquire_frame`.
    generation: AtomicU64,
    regen_requested: AtomicBool,
    vsync: VsyncRequest,
    source: Arc<dyn SurfaceSource>,
}

pub(crate) struct ImmediateQueue {
    shared: Arc<Shared>,
    /// The context while no worker runs. `None` after disconnect.
    parked: Mutex<Option<ImmediateContext>>,
    worker: Mutex<Option<WorkerHandle<ImmediateContext>>>,
}

impl ImmediateQueue {
    pub fn new(device: Box<dyn ImmediateDevice>, source: Arc<dyn SurfaceSource>, vsync: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                fifo: Mutex::new(Fifo {
                    items: VecDeque::new(),
                    accepting: false,
                }),
                available: Condvar::new(),
                generation: AtomicU64::new(0),
                regen_requested: AtomicBool::new(false),
                vsync: VsyncRequest::new(vsync),
                source,
            }),
            parked: Mutex::new(Some(ImmediateContext {
                device,
                surface: SurfaceManager::new(vsync),
            })),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), QueueError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            }
            .into());
        }
        let ctx = self.parked.lock().take().ok_or(GpuError::Disconnected)?;
        self.shared.fifo.lock().accepting = true;
        let shared = Arc::clone(&self.shared);
        let (ready_tx, ready) = completion();
        let handle =
            match WorkerHandle::spawn(THREAD_NAME, move |token| run(ctx, shared, token, ready_tx)) {
                Ok(handle) => handle,
                Err(e) => {
                    self.shared.fifo.lock().accepting = false;
                    return Err(e);
                }
            };
        // The context must be current on the worker before the queue
        // counts as running.
        match ready.wait() {
            Ok(()) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.parked.lock() = handle.join();
                Err(e.into())
            }
        }
    }

    pub fn stop(&self) -> Result<(), QueueError> {
        let handle = self.worker.lock().take().ok_or(LifecycleError::NotRunning {
            component: COMPONENT,
        })?;
        handle.cancel();
        {
            let _fifo = self.shared.fifo.lock();
            self.shared.available.notify_all();
        }
        *self.parked.lock() = handle.join();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub fn submit(
        &self,
        parts: BufferParts,
        detached: bool,
    ) -> Result<CompletionHandle<()>, QueueError> {
        let mut fifo = self.shared.fifo.lock();
        if !fifo.accepting {
            return Err(LifecycleError::NotRunning {
                component: COMPONENT,
            }
            .into());
        }
        let (ticket, handle) = Ticket::accept(parts.id, parts.cell, detached);
        fifo.items.push_back(WorkItem::Execute {
            commands: parts.commands,
            target: parts.target,
            ticket,
        });
        drop(fifo);
        self.shared.available.notify_one();
        Ok(handle)
    }

    pub fn vsync(&self) -> &VsyncRequest {
        &self.shared.vsync
    }

    pub fn wake(&self) {
        self.shared.available.notify_all();
    }

    /// The default framebuffer is always available once it exists.
    pub fn acquire_frame(&self) -> Result<Option<FrameTarget>, QueueError> {
        if !self.is_running() {
            return Err(LifecycleError::NotRunning {
                component: COMPONENT,
            }
            .into());
        }
        let generation = self.generation();
        if generation == SurfaceGeneration::default() {
            return Ok(None);
        }
        Ok(Some(FrameTarget {
            image_index: 0,
            generation,
        }))
    }

    pub fn request_regeneration(&self) {
        self.shared.regen_requested.store(true, Ordering::Release);
        self.wake();
    }

    /// Queue a regeneration behind all earlier buffers and wait for it.
    pub fn regenerate(&self, extent: Option<Extent2D>) -> Result<SurfaceGeneration, QueueError> {
        let (completer, handle) = completion();
        {
            let mut fifo = self.shared.fifo.lock();
            if !fifo.accepting {
                return Err(LifecycleError::NotRunning {
                    component: COMPONENT,
                }
                .into());
            }
            fifo.items.push_back(WorkItem::Regenerate { extent, completer });
        }
        self.shared.available.notify_one();
        Ok(handle.wait()?)
    }

    pub fn generation(&self) -> SurfaceGeneration {
        SurfaceGeneration(self.shared.generation.load(Ordering::Acquire))
    }

    pub fn pending(&self) -> usize {
        self.shared.fifo.lock().items.len()
    }

    /// Tear down the surface and drop the context. The worker must be
    /// stopped.
    pub fn disconnect(&self) {
        if let Some(mut ctx) = self.parked.lock().take() {
            if let Err(e) = ctx.device.make_current() {
                tracing::warn!(error = %e, "make_current failed during disconnect");
            }
            ctx.surface.destroy(&mut *ctx.device);
            ctx.device.release_current();
        }
    }
}

// ── Worker loop ──────────────────────────────────────────────────

fn run(
    mut ctx: ImmediateContext,
    shared: Arc<Shared>,
    token: CancellationToken,
    ready: Completer<()>,
) -> ImmediateContext {
    if let Err(e) = ctx.device.make_current() {
        tracing::error!(error = %e, "could not make the graphics context current");
        drain(&shared, GpuError::ShuttingDown);
        ready.resolve(Err(e));
        return ctx;
    }
    ready.resolve(Ok(()));
    if !ctx.surface.is_live() {
        refresh_surface(&mut ctx, &shared);
    }

    loop {
        if token.is_cancelled() {
            break;
        }
        apply_surface_requests(&mut ctx, &shared);

        let item = {
            let mut fifo = shared.fifo.lock();
            if fifo.items.is_empty() && !token.is_cancelled() {
                shared.available.wait_for(&mut fifo, IDLE_WAIT);
            }
            fifo.items.pop_front()
        };
        if let Some(item) = item {
            execute(&mut ctx, &shared, item);
        }
    }

    drain(&shared, GpuError::ShuttingDown);
    ctx.device.release_current();
    ctx
}

fn apply_surface_requests(ctx: &mut ImmediateContext, shared: &Shared) {
    if let Some(vsync) = shared.vsync.take() {
        shared.vsync.mark_applied(vsync);
        if ctx.surface.set_vsync(vsync) {
            refresh_surface(ctx, shared);
        }
    }
    if shared.regen_requested.swap(false, Ordering::AcqRel) {
        refresh_surface(ctx, shared);
    }
}

/// Regenerate at the window's size. A failure costs this frame only.
fn refresh_surface(ctx: &mut ImmediateContext, shared: &Shared) {
    if let Err(e) = regenerate(ctx, shared, None) {
        tracing::warn!(error = %e, "surface regeneration failed");
    }
}

fn regenerate(
    ctx: &mut ImmediateContext,
    shared: &Shared,
    extent: Option<Extent2D>,
) -> Result<SurfaceGeneration, GpuError> {
    let extent = extent.unwrap_or_else(|| shared.source.content_area_size());
    let generation = ctx.surface.regenerate(&mut *ctx.device, extent)?;
    shared.generation.store(generation.0, Ordering::Release);
    Ok(generation)
}

fn execute(ctx: &mut ImmediateContext, shared: &Shared, item: WorkItem) {
    match item {
        WorkItem::Execute {
            commands,
            target,
            ticket,
        } => {
            if let Some(target) = target {
                let current = ctx.surface.generation();
                if target.generation != current {
                    ticket.reject(GpuError::StaleSurface {
                        target: target.generation,
                        current,
                    });
                    return;
                }
            }
            ticket.executing();
            let mut result = commands
                .into_iter()
                .try_for_each(|command| ctx.device.execute(command));
            if let (true, Some(target)) = (result.is_ok(), target) {
                match ctx.device.present(target.image_index) {
                    Ok(()) => {}
                    Err(AcquireError::OutOfDate) => {
                        shared.regen_requested.store(true, Ordering::Release);
                    }
                    Err(AcquireError::Device(e)) => result = Err(e),
                }
            }
            tracing::trace!(buffer = %ticket.id(), ok = result.is_ok(), "executed");
            ticket.complete(result);
        }
        WorkItem::Regenerate { extent, completer } => {
            completer.resolve(regenerate(ctx, shared, extent));
        }
    }
}

/// Stop accepting and fail everything still queued.
fn drain(shared: &Shared, error: GpuError) {
    let leftovers: Vec<WorkItem> = {
        let mut fifo = shared.fifo.lock();
        fifo.accepting = false;
        fifo.items.drain(..).collect()
    };
    for item in leftovers {
        match item {
            WorkItem::Execute { ticket, .. } => ticket.reject(error.clone()),
            WorkItem::Regenerate { completer, .. } => completer.resolve(Err(error.clone())),
        }
    }
}
