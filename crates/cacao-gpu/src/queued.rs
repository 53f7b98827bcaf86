//! Queued execution model: buffers go straight to the device's hardware
//! queue with a fence; the worker polls fences and resolves handles.
//!
//! One mutex (the submission mutex) guards the device, the surface and
//! the in-flight list together. Submission, fence polling, frame
//! acquisition and surface regeneration all take it, so a regeneration
//! waits for the device to drain with no new work able to slip in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use cacao_core::{
    CancellationToken, CompletionHandle, FenceId, GpuError, LifecycleError, QueueError,
    SurfaceGeneration,
};

use crate::command::BufferParts;
use crate::device::{AcquireError, Extent2D, QueuedDevice, SurfaceSource};
use crate::queue::{Ticket, VsyncRequest, COMPONENT};
use crate::surface::{FrameTarget, SurfaceManager};
use crate::worker::{WorkerHandle, IDLE_WAIT, POLL_INTERVAL};

const THREAD_NAME: &str = "cacao-gpu-queued";

struct InFlight {
    fence: FenceId,
    target: Option<FrameTarget>,
    ticket: Ticket,
}

struct State {
    /// `None` once disconnected.
    device: Option<Box<dyn QueuedDevice>>,
    surface: SurfaceManager,
    in_flight: Vec<InFlight>,
    accepting: bool,
}

impl State {
    /// Resolve every in-flight buffer whose fence has signalled.
    fn poll(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let mut i = 0;
        while i < self.in_flight.len() {
            match device.fence_signaled(self.in_flight[i].fence) {
                Ok(false) => i += 1,
                outcome => {
                    let entry = self.in_flight.remove(i);
                    if let Some(target) = entry.target {
                        self.surface.retire_fence(target, entry.fence);
                    }
                    entry.ticket.complete(outcome.map(drop));
                }
            }
        }
    }

    fn regenerate(&mut self, extent: Extent2D) -> Result<SurfaceGeneration, GpuError> {
        let device = self.device.as_mut().ok_or(GpuError::Disconnected)?;
        let generation = self.surface.regenerate(&mut **device, extent)?;
        // The device is idle now; every fence has signalled.
        self.poll();
        Ok(generation)
    }
}

struct Shared {
    state: Mutex<State>,
    regen_requested: AtomicBool,
    vsync: VsyncRequest,
    source: Arc<dyn SurfaceSource>,
    max_frames_in_flight: Option<usize>,
    waker: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn refresh_surface(&self, state: &mut State) {
        if let Err(e) = state.regenerate(self.source.content_area_size()) {
            tracing::warn!(error = %e, "surface regeneration failed");
        }
    }
}

pub(crate) struct QueuedQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle<()>>>,
}

impl QueuedQueue {
    pub fn new(
        mut device: Box<dyn QueuedDevice>,
        source: Arc<dyn SurfaceSource>,
        vsync: bool,
        max_frames_in_flight: Option<usize>,
    ) -> Result<Self, GpuError> {
        let mut surface = SurfaceManager::new(vsync);
        surface.regenerate(&mut *device, source.content_area_size())?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    device: Some(device),
                    surface,
                    in_flight: Vec::new(),
                    accepting: false,
                }),
                regen_requested: AtomicBool::new(false),
                vsync: VsyncRequest::new(vsync),
                source,
                max_frames_in_flight,
                waker: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn start(&self) -> Result<(), QueueError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            }
            .into());
        }
        {
            let mut state = self.shared.state.lock();
            if state.device.is_none() {
                return Err(GpuError::Disconnected.into());
            }
            state.accepting = true;
        }
        let shared = Arc::clone(&self.shared);
        match WorkerHandle::spawn(THREAD_NAME, move |token| run(&shared, &token)) {
            Ok(handle) => {
                *self.shared.waker.lock() = Some(handle.token().clone());
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().accepting = false;
                Err(e)
            }
        }
    }

    pub fn stop(&self) -> Result<(), QueueError> {
        let handle = self.worker.lock().take().ok_or(LifecycleError::NotRunning {
            component: COMPONENT,
        })?;
        self.shared.waker.lock().take();
        handle.join();
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
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.accepting {
            return Err(LifecycleError::NotRunning {
                component: COMPONENT,
            }
            .into());
        }
        let device = state.device.as_mut().ok_or(GpuError::Disconnected)?;
        let (ticket, handle) = Ticket::accept(parts.id, parts.cell, detached);

        if let Some(target) = parts.target {
            let current = state.surface.generation();
            if target.generation != current {
                ticket.reject(GpuError::StaleSurface {
                    target: target.generation,
                    current,
                });
                return Ok(handle);
            }
        }

        ticket.executing();
        match device.submit(parts.commands, parts.target.map(|t| t.image_index)) {
            Ok(fence) => {
                if let Some(target) = parts.target {
                    state.surface.track_fence(target, fence);
                    match device.present(target.image_index) {
                        Ok(()) => {}
                        Err(AcquireError::OutOfDate) => {
                            self.shared.regen_requested.store(true, Ordering::Release);
                        }
                        Err(AcquireError::Device(e)) => {
                            tracing::warn!(buffer = %ticket.id(), error = %e, "present failed");
                        }
                    }
                }
                state.in_flight.push(InFlight {
                    fence,
                    target: parts.target,
                    ticket,
                });
            }
            Err(e) => ticket.complete(Err(e)),
        }
        drop(guard);
        self.wake();
        Ok(handle)
    }

    pub fn vsync(&self) -> &VsyncRequest {
        &self.shared.vsync
    }

    pub fn wake(&self) {
        if let Some(token) = self.shared.waker.lock().as_ref() {
            token.wake();
        }
    }

    pub fn acquire_frame(&self) -> Result<Option<FrameTarget>, QueueError> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.accepting {
            return Err(LifecycleError::NotRunning {
                component: COMPONENT,
            }
            .into());
        }
        let device = state.device.as_mut().ok_or(GpuError::Disconnected)?;
        if state.surface.is_live() {
            let images = state.surface.image_count();
            let limit = self
                .shared
                .max_frames_in_flight
                .map_or(images, |max| max.clamp(1, images.max(1)));
            if state.surface.frames_in_flight() >= limit {
                return Ok(None);
            }
        }
        let generation = state.surface.generation();
        let target = state.surface.acquire(&mut **device, &*self.shared.source)?;
        if target.generation != generation {
            state.poll();
        }
        Ok(Some(target))
    }

    pub fn request_regeneration(&self) {
        self.shared.regen_requested.store(true, Ordering::Release);
        self.wake();
    }

    /// Regenerate on the calling thread, holding the submission mutex.
    pub fn regenerate(&self, extent: Option<Extent2D>) -> Result<SurfaceGeneration, QueueError> {
        let extent = extent.unwrap_or_else(|| self.shared.source.content_area_size());
        let mut state = self.shared.state.lock();
        Ok(state.regenerate(extent)?)
    }

    pub fn generation(&self) -> SurfaceGeneration {
        self.shared.state.lock().surface.generation()
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Destroy the surface and drop the device. The worker must be
    /// stopped, so nothing is in flight.
    pub fn disconnect(&self) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        state.accepting = false;
        if let Some(mut device) = state.device.take() {
            state.surface.destroy(&mut *device);
        }
        for entry in state.in_flight.drain(..) {
            entry.ticket.complete(Err(GpuError::Disconnected));
        }
    }
}

// ── Worker loop ──────────────────────────────────────────────────

fn run(shared: &Shared, token: &CancellationToken) {
    while !token.is_cancelled() {
        if let Some(vsync) = shared.vsync.take() {
            shared.vsync.mark_applied(vsync);
            let mut state = shared.state.lock();
            if state.surface.set_vsync(vsync) {
                shared.refresh_surface(&mut state);
            }
        }
        if shared.regen_requested.swap(false, Ordering::AcqRel) {
            shared.refresh_surface(&mut shared.state.lock());
        }

        let busy = {
            let mut state = shared.state.lock();
            state.poll();
            !state.in_flight.is_empty()
        };
        thread::park_timeout(if busy { POLL_INTERVAL } else { IDLE_WAIT });
    }

    // Stop accepting, let the device finish, then resolve what retired.
    let mut guard = shared.state.lock();
    let state = &mut *guard;
    state.accepting = false;
    if let Some(device) = state.device.as_mut() {
        if let Err(e) = device.wait_idle() {
            tracing::warn!(error = %e, "wait_idle failed while stopping");
        }
    }
    state.poll();
    for entry in state.in_flight.drain(..) {
        entry.ticket.complete(Err(GpuError::ShuttingDown));
    }
}
