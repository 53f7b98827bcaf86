//! Reusable simulation fixtures for scheduler testing.
//!
//! - [`ScriptedSimulation`]: each tick costs a scripted amount of
//!   virtual time on a shared [`ManualClock`] and is logged.
//! - [`CountingSimulation`]: wall-clock work split across two counters,
//!   for catching reads that land in the middle of a tick.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use cacao_core::{Clock, Simulation, Timestamp};

use crate::ManualClock;

/// One executed tick, as seen by [`ScriptedSimulation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickEvent {
    Fixed { at: Timestamp },
    Dynamic { at: Timestamp, timestep: Duration },
}

/// Simulation whose ticks "cost" virtual time.
///
/// Running a tick advances the shared clock by the configured cost, so
/// the scheduler sees the same elapsed time a real workload would cause.
#[derive(Debug)]
pub struct ScriptedSimulation {
    clock: ManualClock,
    fixed_cost: Duration,
    dynamic_cost: Duration,
    dynamic_overrides: HashMap<usize, Duration>,
    events: Vec<TickEvent>,
    dynamic_count: usize,
}

impl ScriptedSimulation {
    /// Free ticks on `clock`.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            fixed_cost: Duration::ZERO,
            dynamic_cost: Duration::ZERO,
            dynamic_overrides: HashMap::new(),
            events: Vec::new(),
            dynamic_count: 0,
        }
    }

    pub fn with_fixed_cost(mut self, cost: Duration) -> Self {
        self.fixed_cost = cost;
        self
    }

    pub fn with_dynamic_cost(mut self, cost: Duration) -> Self {
        self.dynamic_cost = cost;
        self
    }

    /// Make the `index`-th dynamic tick (0-based) cost `cost` instead.
    pub fn with_dynamic_override(mut self, index: usize, cost: Duration) -> Self {
        self.dynamic_overrides.insert(index, cost);
        self
    }

    pub fn events(&self) -> &[TickEvent] {
        &self.events
    }

    pub fn fixed_ticks(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TickEvent::Fixed { .. }))
            .count()
    }

    pub fn dynamic_ticks(&self) -> usize {
        self.dynamic_count
    }

    /// Start times of every fixed tick.
    pub fn fixed_times(&self) -> Vec<Timestamp> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TickEvent::Fixed { at } => Some(*at),
                TickEvent::Dynamic { .. } => None,
            })
            .collect()
    }
}

impl Simulation for ScriptedSimulation {
    fn fixed_tick(&mut self, _interval: Duration) {
        self.events.push(TickEvent::Fixed {
            at: self.clock.now(),
        });
        self.clock.advance(self.fixed_cost);
    }

    fn dynamic_tick(&mut self, timestep: Duration) {
        self.events.push(TickEvent::Dynamic {
            at: self.clock.now(),
            timestep,
        });
        let cost = self
            .dynamic_overrides
            .get(&self.dynamic_count)
            .copied()
            .unwrap_or(self.dynamic_cost);
        self.dynamic_count += 1;
        self.clock.advance(cost);
    }
}

/// Simulation that bumps `left`, does real work, then bumps `right`.
///
/// Outside a tick the two are always equal; a reader that sees them
/// differ has observed a half-applied tick.
#[derive(Clone, Debug, Default)]
pub struct CountingSimulation {
    pub fixed: u64,
    pub dynamic: u64,
    pub left: u64,
    pub right: u64,
    pub work: Duration,
}

impl CountingSimulation {
    pub fn with_work(work: Duration) -> Self {
        Self {
            work,
            ..Self::default()
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.left == self.right
    }
}

impl Simulation for CountingSimulation {
    fn fixed_tick(&mut self, _interval: Duration) {
        self.fixed += 1;
        self.left += 1;
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.right += 1;
    }

    fn dynamic_tick(&mut self, _timestep: Duration) {
        self.dynamic += 1;
    }
}
