//! The tick scheduler: fixed-rate plus opportunistic dynamic ticks.
//!
//! One dedicated thread (`cacao-tick`) owns the simulation for the whole
//! run. Each loop iteration does, in order:
//!
//! 1. serve a pending snapshot request ([`SnapshotReader`]);
//! 2. reset the dynamic cost window if it went stale;
//! 3. run the fixed tick if it is due (on time or catch-up), or skip it
//!    if it is too late;
//! 4. otherwise run one dynamic tick if it fits before the deadline;
//! 5. otherwise sleep until just before the deadline.
//!
//! At most one tick executes per iteration. The same iteration body is
//! available on the caller's thread through
//! [`run_for()`](TickScheduler::run_for), which is how tests and benches
//! drive it against a virtual clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use cacao_core::{CancellationToken, Clock, LifecycleError, Simulation, SystemClock};

use crate::config::{ConfigError, EngineConfig};
use crate::snapshot::{Handshake, SnapshotReader};
use crate::tick::{FixedDecision, TickClock};

const COMPONENT: &str = "tick scheduler";
const THREAD_NAME: &str = "cacao-tick";

/// Errors from scheduler control calls.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SchedulerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Called in a state that does not permit it.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The scheduler thread could not be spawned.
    #[error("failed to spawn the tick thread: {reason}")]
    Spawn {
        /// OS error text.
        reason: String,
    },
    /// The scheduler thread panicked (inside a simulation tick).
    #[error("the tick thread panicked")]
    Panicked,
}

// ── Stats ────────────────────────────────────────────────────────

/// Counters for one scheduler run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Fixed ticks executed, catch-ups included.
    pub fixed: u64,
    /// Fixed ticks executed late (within half an interval).
    pub catch_up: u64,
    /// Fixed ticks dropped for being too late.
    pub skipped: u64,
    /// Dynamic ticks executed.
    pub dynamic: u64,
    /// Fixed deadlines missed by more than the grace window.
    pub late: u64,
    /// Times the dynamic cost window was reset as stale.
    pub window_resets: u64,
    /// Snapshot windows granted to the reader.
    pub snapshots: u64,
}

#[derive(Default)]
struct TickCounters {
    fixed: AtomicU64,
    catch_up: AtomicU64,
    skipped: AtomicU64,
    dynamic: AtomicU64,
    late: AtomicU64,
    window_resets: AtomicU64,
    snapshots: AtomicU64,
}

impl TickCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for c in [
            &self.fixed,
            &self.catch_up,
            &self.skipped,
            &self.dynamic,
            &self.late,
            &self.window_resets,
            &self.snapshots,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> TickStats {
        TickStats {
            fixed: self.fixed.load(Ordering::Relaxed),
            catch_up: self.catch_up.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dynamic: self.dynamic.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            window_resets: self.window_resets.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
        }
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Steps 2 to 5 of an iteration, shared by the thread and `run_for`.
struct Driver<C> {
    clock: C,
    timing: TickClock,
    counters: Arc<TickCounters>,
}

impl<C: Clock> Driver<C> {
    fn new(clock: C, config: &EngineConfig, counters: Arc<TickCounters>) -> Self {
        let timing = TickClock::new(config, clock.now());
        Self {
            clock,
            timing,
            counters,
        }
    }

    /// Run at most one tick. `hold` is checked before sleeping; when it
    /// returns true the sleep is skipped so the caller can loop back.
    fn step<S: Simulation>(&mut self, sim: &mut S, hold: impl Fn() -> bool) {
        let now = self.clock.now();
        if let Some(behind) = self.timing.reset_if_stale(now) {
            TickCounters::bump(&self.counters.window_resets);
            tracing::warn!(
                behind_ms = behind.as_millis() as u64,
                "no dynamic tick within the stale window, resetting cost average"
            );
        }

        let interval = self.timing.interval();
        match self.timing.decide_fixed(now) {
            FixedDecision::OnTime => {
                sim.fixed_tick(interval);
                TickCounters::bump(&self.counters.fixed);
                return;
            }
            FixedDecision::CatchUp { late } => {
                tracing::debug!(late_us = late.as_micros() as u64, "catching up late fixed tick");
                sim.fixed_tick(interval);
                TickCounters::bump(&self.counters.fixed);
                TickCounters::bump(&self.counters.catch_up);
                TickCounters::bump(&self.counters.late);
                return;
            }
            FixedDecision::Skip { late } => {
                tracing::debug!(late_us = late.as_micros() as u64, "skipping missed fixed tick");
                TickCounters::bump(&self.counters.skipped);
                TickCounters::bump(&self.counters.late);
            }
            FixedDecision::NotDue => {}
        }

        if self.timing.dynamic_due(now) {
            sim.dynamic_tick(self.timing.dynamic_timestep(now));
            self.timing.record_dynamic(now, self.clock.now());
            TickCounters::bump(&self.counters.dynamic);
            return;
        }

        if !hold() {
            self.clock.sleep(self.timing.sleep_target(now));
        }
    }
}

// ── TickScheduler ────────────────────────────────────────────────

struct Running {
    token: CancellationToken,
    thread: JoinHandle<()>,
}

/// Drives a [`Simulation`] on a dedicated thread.
///
/// The simulation is owned by the scheduler for its whole life. While
/// running, the only way to look at it from outside is the
/// [`SnapshotReader`]; while stopped, [`with_state()`](Self::with_state)
/// gives direct access.
pub struct TickScheduler<S: Simulation, C: Clock + Clone = SystemClock> {
    state: Arc<Mutex<S>>,
    clock: C,
    config: EngineConfig,
    handshake: Arc<Handshake>,
    counters: Arc<TickCounters>,
    running: Option<Running>,
    reader_taken: bool,
}

impl<S: Simulation> TickScheduler<S> {
    /// A scheduler on the system clock.
    pub fn with_system_clock(sim: S, config: &EngineConfig) -> Result<Self, SchedulerError> {
        Self::new(sim, SystemClock::new(), config)
    }
}

impl<S: Simulation, C: Clock + Clone> TickScheduler<S, C> {
    /// A stopped scheduler owning `sim`.
    pub fn new(sim: S, clock: C, config: &EngineConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(Mutex::new(sim)),
            clock,
            config: config.clone(),
            handshake: Arc::new(Handshake::new()),
            counters: Arc::new(TickCounters::default()),
            running: None,
            reader_taken: false,
        })
    }

    /// The configured fixed cadence.
    pub fn interval(&self) -> Duration {
        self.config.fixed_tick_interval
    }

    /// Whether the scheduler thread is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Live counters for the current (or last) run.
    pub fn stats(&self) -> TickStats {
        self.counters.snapshot()
    }

    /// Take the single snapshot reader.
    ///
    /// The reader outlives start/stop cycles; reads while stopped fail
    /// with [`SnapshotError::NotRunning`](crate::SnapshotError::NotRunning).
    pub fn snapshot_reader(&mut self) -> Result<SnapshotReader<S>, LifecycleError> {
        if self.reader_taken {
            return Err(LifecycleError::ReaderTaken);
        }
        self.reader_taken = true;
        Ok(SnapshotReader::new(
            Arc::clone(&self.handshake),
            Arc::clone(&self.state),
        ))
    }

    /// Spawn the scheduler thread. Timing starts fresh: the first fixed
    /// tick is due one interval from now.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            }
            .into());
        }
        self.counters.reset();

        let token = CancellationToken::new();
        self.handshake.open(token.clone());

        let loop_token = token.clone();
        let state = Arc::clone(&self.state);
        let handshake = Arc::clone(&self.handshake);
        let counters = Arc::clone(&self.counters);
        let clock = self.clock.clone();
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                loop_token.register_current_thread();
                let mut sim = state.lock();
                let mut driver = Driver::new(clock, &config, counters);
                tracing::info!(
                    interval_ms = config.fixed_tick_interval.as_millis() as u64,
                    "tick scheduler started"
                );
                run_loop(&mut sim, &mut driver, &handshake, &loop_token);
            });

        match spawned {
            Ok(thread) => {
                self.running = Some(Running { token, thread });
                Ok(())
            }
            Err(e) => {
                self.handshake.close();
                Err(SchedulerError::Spawn {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stop the scheduler and wait for its thread.
    ///
    /// The tick in progress (if any) finishes; no tick starts after this
    /// returns. A reader blocked waiting for a grant fails with
    /// [`SnapshotError::Stopped`](crate::SnapshotError::Stopped).
    pub fn stop(&mut self) -> Result<TickStats, SchedulerError> {
        let running = self.running.take().ok_or(LifecycleError::NotRunning {
            component: COMPONENT,
        })?;
        self.handshake.close();
        running.token.cancel();
        let joined = running.thread.join();
        let stats = self.counters.snapshot();
        tracing::info!(
            fixed = stats.fixed,
            dynamic = stats.dynamic,
            late = stats.late,
            skipped = stats.skipped,
            snapshots = stats.snapshots,
            "tick scheduler stopped"
        );
        match joined {
            Ok(()) => Ok(stats),
            Err(_) => {
                tracing::error!("tick thread panicked");
                Err(SchedulerError::Panicked)
            }
        }
    }

    /// Run scheduler iterations on the calling thread until `duration`
    /// of clock time has passed. No snapshots are served.
    ///
    /// With a virtual clock that advances on sleep this is fully
    /// deterministic.
    pub fn run_for(&mut self, duration: Duration) -> Result<TickStats, SchedulerError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            }
            .into());
        }
        self.counters.reset();
        let mut driver = Driver::new(self.clock.clone(), &self.config, Arc::clone(&self.counters));
        let end = self.clock.now() + duration;
        let mut sim = self.state.lock();
        while self.clock.now() < end {
            driver.step(&mut *sim, || false);
        }
        Ok(self.counters.snapshot())
    }

    /// Inspect the simulation while stopped.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, LifecycleError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            });
        }
        Ok(f(&self.state.lock()))
    }

    /// Modify the simulation while stopped.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, LifecycleError> {
        if self.running.is_some() {
            return Err(LifecycleError::AlreadyRunning {
                component: COMPONENT,
            });
        }
        Ok(f(&mut self.state.lock()))
    }

    /// Stop if running and hand the simulation back.
    ///
    /// `None` while a [`SnapshotReader`] is still alive, since it shares
    /// the state.
    pub fn into_simulation(self) -> Option<S> {
        let state = Arc::clone(&self.state);
        drop(self);
        Arc::try_unwrap(state).ok().map(Mutex::into_inner)
    }
}

impl<S: Simulation, C: Clock + Clone> Drop for TickScheduler<S, C> {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

impl<S: Simulation, C: Clock + Clone> std::fmt::Debug for TickScheduler<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("interval", &self.config.fixed_tick_interval)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Scheduler thread body. Holds the simulation lock except inside a
/// granted snapshot window.
fn run_loop<S: Simulation, C: Clock>(
    sim: &mut MutexGuard<'_, S>,
    driver: &mut Driver<C>,
    handshake: &Handshake,
    token: &CancellationToken,
) {
    while !token.is_cancelled() {
        if handshake.is_requested() {
            let served = MutexGuard::unlocked(sim, || handshake.serve(token));
            if served {
                TickCounters::bump(&driver.counters.snapshots);
            }
            if token.is_cancelled() {
                break;
            }
        }
        driver.step(&mut **sim, || handshake.is_requested());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacao_test_utils::{CountingSimulation, ManualClock, ScriptedSimulation};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn config(interval: u64) -> EngineConfig {
        EngineConfig {
            fixed_tick_interval: ms(interval),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = TickScheduler::with_system_clock(
            CountingSimulation::default(),
            &EngineConfig {
                fixed_tick_interval: Duration::ZERO,
                ..EngineConfig::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, SchedulerError::Config(ConfigError::ZeroInterval));
    }

    #[test]
    fn fixed_ticks_land_one_grace_before_each_deadline() {
        let clock = ManualClock::new();
        let sim = ScriptedSimulation::new(clock.clone()).with_dynamic_cost(ms(1));
        let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(20)).unwrap();
        let stats = scheduler.run_for(ms(200)).unwrap();
        assert_eq!(stats.fixed, 10);
        assert_eq!(stats.late, 0);
        scheduler
            .with_state(|s| {
                let times: Vec<u64> = s
                    .fixed_times()
                    .iter()
                    .map(|t| t.offset().as_millis() as u64)
                    .collect();
                assert_eq!(times, vec![19, 39, 59, 79, 99, 119, 139, 159, 179, 199]);
            })
            .unwrap();
    }

    #[test]
    fn start_twice_and_stop_twice_fail() {
        let mut scheduler =
            TickScheduler::with_system_clock(CountingSimulation::default(), &config(5)).unwrap();
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::Lifecycle(LifecycleError::AlreadyRunning { .. }))
        ));
        assert!(matches!(
            scheduler.run_for(ms(1)),
            Err(SchedulerError::Lifecycle(LifecycleError::AlreadyRunning { .. }))
        ));
        assert!(scheduler.with_state(|_| ()).is_err());
        scheduler.stop().unwrap();
        assert!(matches!(
            scheduler.stop(),
            Err(SchedulerError::Lifecycle(LifecycleError::NotRunning { .. }))
        ));
    }

    #[test]
    fn no_ticks_after_stop() {
        let mut scheduler =
            TickScheduler::with_system_clock(CountingSimulation::default(), &config(2)).unwrap();
        scheduler.start().unwrap();
        thread::sleep(ms(30));
        let stats = scheduler.stop().unwrap();
        let after_stop = scheduler.with_state(|s| (s.fixed, s.dynamic)).unwrap();
        assert_eq!(after_stop, (stats.fixed, stats.dynamic));
        thread::sleep(ms(20));
        assert_eq!(
            scheduler.with_state(|s| (s.fixed, s.dynamic)).unwrap(),
            after_stop
        );
    }

    #[test]
    fn second_reader_is_refused() {
        let mut scheduler =
            TickScheduler::with_system_clock(CountingSimulation::default(), &config(5)).unwrap();
        let _reader = scheduler.snapshot_reader().unwrap();
        assert_eq!(
            scheduler.snapshot_reader().unwrap_err(),
            LifecycleError::ReaderTaken
        );
    }

    #[test]
    fn restart_resets_counters_and_keeps_state() {
        let mut scheduler =
            TickScheduler::with_system_clock(CountingSimulation::default(), &config(2)).unwrap();
        scheduler.start().unwrap();
        thread::sleep(ms(20));
        let first = scheduler.stop().unwrap();
        assert!(first.fixed > 0);

        scheduler.with_state_mut(|s| s.fixed += 1000).unwrap();
        scheduler.start().unwrap();
        thread::sleep(ms(20));
        let second = scheduler.stop().unwrap();
        let total = scheduler.with_state(|s| s.fixed).unwrap();
        assert_eq!(total, first.fixed + 1000 + second.fixed);
    }
}
