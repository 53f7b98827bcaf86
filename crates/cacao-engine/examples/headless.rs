//! Cacao headless demo: a bouncing ball driven through every engine stage.
//!
//! Demonstrates:
//!   1. Loading an `EngineConfig` from TOML
//!   2. Implementing `Simulation` with separate fixed and dynamic steps
//!   3. Implementing a `FramePipeline` that copies state out of a snapshot
//!   4. Bringing the engine up on the headless backends, resizing the
//!      surface while running, and tearing everything down in order
//!
//! Set `RUST_LOG=cacao_engine=debug,cacao_gpu=debug` to watch the
//! scheduler and the GPU worker.
//!
//! Run with:
//!   cargo run --example headless

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cacao_core::{Simulation, SystemClock};
use cacao_engine::{Engine, EngineConfig, FramePipeline};
use cacao_gpu::{CommandBuffer, Extent2D, HeadlessSurface, SurfaceSource};
use tracing_subscriber::EnvFilter;

// ─── Configuration ──────────────────────────────────────────────

const CONFIG: &str = r#"
fixed_tick_interval_ms = 16
grace_window_ms = 2
backend_preference = ["queued", "immediate"]
vsync = true
max_frames_in_flight = 2
"#;

const RUN_FOR: Duration = Duration::from_secs(1);

// ─── Simulation: a ball bouncing between two walls ──────────────

#[derive(Debug, Default)]
struct Ball {
    /// Position in [0, 1], advanced only by fixed ticks.
    x: f64,
    velocity: f64,
    /// Smoothed position for rendering, advanced by dynamic ticks.
    shown: f64,
    bounces: u32,
}

impl Ball {
    fn new() -> Self {
        Self {
            velocity: 0.8,
            ..Self::default()
        }
    }
}

impl Simulation for Ball {
    fn fixed_tick(&mut self, interval: Duration) {
        self.x += self.velocity * interval.as_secs_f64();
        if !(0.0..=1.0).contains(&self.x) {
            self.x = self.x.clamp(0.0, 1.0);
            self.velocity = -self.velocity;
            self.bounces += 1;
        }
    }

    fn dynamic_tick(&mut self, timestep: Duration) {
        // Ease the displayed position toward the simulated one.
        let blend = (timestep.as_secs_f64() * 20.0).min(1.0);
        self.shown += (self.x - self.shown) * blend;
    }
}

// ─── Frame pipeline ─────────────────────────────────────────────

#[derive(Default)]
struct BallPipeline {
    shown: f64,
    frame: u64,
}

impl FramePipeline<Ball> for BallPipeline {
    fn extract(&mut self, state: &Ball) {
        self.shown = state.shown;
    }

    fn record(&mut self, buffer: &mut CommandBuffer) {
        self.frame += 1;
        let shade = self.shown as f32;
        buffer
            .begin_rendering([shade, 0.2, 1.0 - shade, 1.0])
            .marker(format!("frame {} ball at {:.3}", self.frame, self.shown))
            .end_rendering();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = EngineConfig::from_toml_str(CONFIG)?;
    println!(
        "fixed interval {:?}, backends {:?}",
        config.fixed_tick_interval,
        config.backend_order()
    );

    let surface = Arc::new(HeadlessSurface::new(Extent2D::new(1280, 720)));
    let mut engine: Engine<Ball> =
        Engine::headless(config, Arc::clone(&surface) as Arc<dyn SurfaceSource>)?;

    engine.core_init(Ball::new(), SystemClock::new())?;
    engine.gfx_init(Box::new(BallPipeline::default()))?;
    println!("backend: {}", engine.active_backend().unwrap_or("none"));

    engine.run()?;
    thread::sleep(RUN_FOR / 2);
    surface.resize(Extent2D::new(1920, 1080));
    engine.notify_resize();
    thread::sleep(RUN_FOR / 2);

    let ticks = engine.quit()?;
    let frames = engine.gfx_shutdown()?;
    println!(
        "ticks: {} fixed ({} caught up, {} skipped), {} dynamic, {} snapshots",
        ticks.fixed, ticks.catch_up, ticks.skipped, ticks.dynamic, ticks.snapshots
    );
    println!(
        "frames: {} submitted, {} skipped, {} failed",
        frames.frames, frames.skipped, frames.failed
    );

    if let Some(ball) = engine.core_shutdown()? {
        println!("ball at {:.3} after {} bounces", ball.x, ball.bounces);
    }
    Ok(())
}
