//! The engine context root.
//!
//! [`Engine`] owns every long-lived runtime object (configuration,
//! backend registry, tick scheduler, command queue, frame processor)
//! and passes them to each other explicitly. Nothing is reachable
//! through a global.
//!
//! Bring-up and tear-down are staged:
//!
//! ```text
//! Dead --core_init--> Alive --gfx_init--> Ready --run--> Running
//! Dead <-core_shutdown- Alive <-gfx_shutdown- Ready <-quit-- Running
//! ```
//!
//! Calling a stage in any other state fails with
//! [`LifecycleError::EngineState`]. Dropping the engine walks back down
//! to `Dead`.

use std::fmt;
use std::sync::Arc;

use cacao_core::{Clock, LifecycleError, ModuleId, Simulation, SystemClock};
use cacao_gpu::{
    Backend, CommandQueue, ConnectOptions, HeadlessImmediate, HeadlessQueued, ModuleRegistry,
    SurfaceSource,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::frame::{FramePipeline, FrameProcessor, FrameStats};
use crate::scheduler::{TickScheduler, TickStats};
use crate::snapshot::SnapshotReader;

/// Bring-up stage of an [`Engine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing exists.
    Dead,
    /// The simulation and scheduler exist; no backend.
    Alive,
    /// A backend is connected and frames are being processed; the
    /// simulation is paused.
    Ready,
    /// The scheduler is ticking.
    Running,
}

impl EngineState {
    fn name(self) -> &'static str {
        match self {
            EngineState::Dead => "dead",
            EngineState::Alive => "alive",
            EngineState::Ready => "ready",
            EngineState::Running => "running",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Graphics<S> {
    module: ModuleId,
    queue: Arc<CommandQueue>,
    frames: FrameProcessor<S>,
}

/// Owns and sequences the runtime.
pub struct Engine<S: Simulation, C: Clock + Clone = SystemClock> {
    config: EngineConfig,
    registry: ModuleRegistry,
    surface: Arc<dyn SurfaceSource>,
    state: EngineState,
    scheduler: Option<TickScheduler<S, C>>,
    reader: Option<SnapshotReader<S>>,
    graphics: Option<Graphics<S>>,
    tick_stats: TickStats,
    frame_stats: FrameStats,
}

impl<S: Simulation> Engine<S> {
    /// An engine with the two headless backends registered as
    /// `"queued"` and `"immediate"`.
    pub fn headless(
        config: EngineConfig,
        surface: Arc<dyn SurfaceSource>,
    ) -> Result<Self, EngineError> {
        let mut registry = ModuleRegistry::new();
        registry.register("queued", Backend::Queued(Box::new(HeadlessQueued)))?;
        registry.register("immediate", Backend::Immediate(Box::new(HeadlessImmediate)))?;
        Self::new(config, registry, surface)
    }
}

impl<S: Simulation, C: Clock + Clone> Engine<S, C> {
    /// A dead engine. Validates `config`.
    pub fn new(
        config: EngineConfig,
        registry: ModuleRegistry,
        surface: Arc<dyn SurfaceSource>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            surface,
            state: EngineState::Dead,
            scheduler: None,
            reader: None,
            graphics: None,
            tick_stats: TickStats::default(),
            frame_stats: FrameStats::default(),
        })
    }

    /// Current stage.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backend registry.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Mutable registry access, for registering fresh backend instances
    /// while no backend is in use.
    pub fn registry_mut(&mut self) -> Result<&mut ModuleRegistry, LifecycleError> {
        self.require("modify the backend registry", &[EngineState::Dead, EngineState::Alive])?;
        Ok(&mut self.registry)
    }

    /// Name of the connected backend.
    pub fn active_backend(&self) -> Option<&str> {
        let graphics = self.graphics.as_ref()?;
        self.registry.get(graphics.module).ok().map(|m| m.name())
    }

    /// The connected backend's command queue.
    pub fn queue(&self) -> Option<&Arc<CommandQueue>> {
        self.graphics.as_ref().map(|g| &g.queue)
    }

    /// Live tick counters, or those of the last run.
    pub fn tick_stats(&self) -> TickStats {
        match &self.scheduler {
            Some(s) if s.is_running() => s.stats(),
            _ => self.tick_stats,
        }
    }

    /// Live frame counters, or those of the last frame processor.
    pub fn frame_stats(&self) -> FrameStats {
        match &self.graphics {
            Some(g) => g.frames.stats(),
            None => self.frame_stats,
        }
    }

    fn require(&self, operation: &'static str, allowed: &[EngineState]) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(LifecycleError::EngineState {
            operation,
            state: self.state.name(),
        })
    }

    fn enter(&mut self, next: EngineState) {
        tracing::info!(from = %self.state, to = %next, "engine state");
        self.state = next;
    }

    // ── Stages ───────────────────────────────────────────────────

    /// Create the scheduler around `sim`. Dead → Alive.
    pub fn core_init(&mut self, sim: S, clock: C) -> Result<(), EngineError> {
        self.require("core_init", &[EngineState::Dead])?;
        let mut scheduler = TickScheduler::new(sim, clock, &self.config)?;
        self.reader = Some(scheduler.snapshot_reader()?);
        self.scheduler = Some(scheduler);
        self.enter(EngineState::Alive);
        Ok(())
    }

    /// Select and connect a backend, start its queue, and start the
    /// frame processor with `pipeline`. Alive → Ready.
    ///
    /// Backends are tried in [`EngineConfig::backend_order()`]; one that
    /// initializes but fails to connect is terminated and the next is
    /// tried.
    pub fn gfx_init(&mut self, pipeline: Box<dyn FramePipeline<S>>) -> Result<(), EngineError> {
        self.require("gfx_init", &[EngineState::Alive])?;
        let order = self.config.backend_order();
        let (module, queue) = self.connect_first(&order)?;

        if let Err(e) = self.start_queue(&queue) {
            self.release_backend(module, &queue);
            return Err(e);
        }
        let Some(reader) = self.reader.take() else {
            self.release_backend(module, &queue);
            return Err(LifecycleError::ReaderTaken.into());
        };
        let frames = match FrameProcessor::spawn(
            reader,
            pipeline,
            Arc::clone(&queue),
            self.config.max_frames_in_flight,
        ) {
            Ok(frames) => frames,
            Err(e) => {
                self.release_backend(module, &queue);
                return Err(e);
            }
        };

        self.graphics = Some(Graphics {
            module,
            queue,
            frames,
        });
        self.enter(EngineState::Ready);
        Ok(())
    }

    fn connect_first(
        &mut self,
        order: &[String],
    ) -> Result<(ModuleId, Arc<CommandQueue>), EngineError> {
        let options = ConnectOptions {
            vsync: self.config.vsync,
            max_frames_in_flight: self.config.max_frames_in_flight,
        };
        for name in order {
            let Some(id) = self.registry.init_first(std::slice::from_ref(name))? else {
                continue;
            };
            let module = self.registry.get_mut(id)?;
            match module.connect(Arc::clone(&self.surface), options) {
                Ok(queue) => return Ok((id, queue)),
                Err(error) => {
                    tracing::warn!(backend = %name, %error, "backend failed to connect, trying next");
                    if let Err(error) = module.term() {
                        tracing::warn!(backend = %name, %error, "backend term failed");
                    }
                }
            }
        }
        tracing::error!(tried = ?order, "no usable backend");
        Err(EngineError::NoUsableBackend {
            tried: order.to_vec(),
        })
    }

    fn start_queue(&self, queue: &CommandQueue) -> Result<(), EngineError> {
        queue.start()?;
        queue.set_vsync(self.config.vsync)?;
        Ok(())
    }

    /// Disconnect and terminate `module`. Failures are logged; the
    /// module is unusable either way.
    fn release_backend(&mut self, module: ModuleId, queue: &CommandQueue) {
        if queue.is_running() {
            if let Err(error) = queue.stop() {
                tracing::warn!(%error, "command queue stop failed");
            }
        }
        let Ok(module) = self.registry.get_mut(module) else {
            return;
        };
        if let Err(error) = module.disconnect() {
            tracing::warn!(backend = module.name(), %error, "backend disconnect failed");
        }
        if let Err(error) = module.term() {
            tracing::warn!(backend = module.name(), %error, "backend term failed");
        }
    }

    /// Start ticking. Ready → Running.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.require("run", &[EngineState::Ready])?;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.start()?;
        }
        self.enter(EngineState::Running);
        Ok(())
    }

    /// Stop ticking. Running → Ready. Frames keep flowing but the
    /// simulation no longer changes.
    pub fn quit(&mut self) -> Result<TickStats, EngineError> {
        self.require("quit", &[EngineState::Running])?;
        if let Some(scheduler) = self.scheduler.as_mut() {
            self.tick_stats = scheduler.stop()?;
        }
        self.enter(EngineState::Ready);
        Ok(self.tick_stats)
    }

    /// Stop the frame processor and the queue, then disconnect and
    /// terminate the backend. Ready → Alive.
    ///
    /// The terminated backend stays registered but cannot be selected
    /// again; register a fresh instance to reconnect it.
    pub fn gfx_shutdown(&mut self) -> Result<FrameStats, EngineError> {
        self.require("gfx_shutdown", &[EngineState::Ready])?;
        let Some(graphics) = self.graphics.take() else {
            self.enter(EngineState::Alive);
            return Ok(self.frame_stats);
        };
        let stopped = graphics.frames.stop();
        self.release_backend(graphics.module, &graphics.queue);
        self.enter(EngineState::Alive);

        let parts = stopped?;
        self.reader = Some(parts.reader);
        self.frame_stats = parts.stats;
        Ok(parts.stats)
    }

    /// Drop the scheduler and return the simulation. Alive → Dead.
    pub fn core_shutdown(&mut self) -> Result<Option<S>, EngineError> {
        self.require("core_shutdown", &[EngineState::Alive])?;
        self.reader = None;
        let sim = self.scheduler.take().and_then(TickScheduler::into_simulation);
        self.enter(EngineState::Dead);
        Ok(sim)
    }

    // ── Collaborators ────────────────────────────────────────────

    /// Forward a window resize to the command queue.
    pub fn notify_resize(&self) {
        if let Some(graphics) = &self.graphics {
            graphics.queue.notify_resize();
        }
    }

    /// Inspect the simulation while it is not ticking.
    pub fn with_simulation<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, EngineError> {
        let scheduler = self.scheduler.as_ref().ok_or(LifecycleError::EngineState {
            operation: "inspect the simulation",
            state: self.state.name(),
        })?;
        Ok(scheduler.with_state(f)?)
    }

    /// Walk down to `Dead`, logging failures instead of returning them.
    pub fn shutdown(&mut self) {
        if self.state == EngineState::Running {
            if let Err(error) = self.quit() {
                tracing::warn!(%error, "engine quit failed");
            }
        }
        if self.state == EngineState::Ready {
            if let Err(error) = self.gfx_shutdown() {
                tracing::warn!(%error, "engine graphics shutdown failed");
            }
        }
        if self.state == EngineState::Alive {
            if let Err(error) = self.core_shutdown() {
                tracing::warn!(%error, "engine core shutdown failed");
            }
        }
    }
}

impl<S: Simulation, C: Clock + Clone> Drop for Engine<S, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: Simulation, C: Clock + Clone> fmt::Debug for Engine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("backend", &self.active_backend())
            .finish()
    }
}
