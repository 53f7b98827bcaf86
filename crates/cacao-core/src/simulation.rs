//! The [`Simulation`] trait driven by the tick scheduler.

use std::time::Duration;

/// Simulation state advanced by the tick scheduler.
///
/// The scheduler is the only mutator. Readers on other threads see the
/// state only through a granted snapshot window, so implementations
/// need no internal synchronization.
pub trait Simulation: Send + 'static {
    /// Advance by one fixed step. `interval` is the configured cadence.
    fn fixed_tick(&mut self, interval: Duration);

    /// Advance by a variable step. `timestep` is the time elapsed since
    /// the previous dynamic tick finished.
    fn dynamic_tick(&mut self, timestep: Duration);
}

impl<S: Simulation + ?Sized> Simulation for Box<S> {
    fn fixed_tick(&mut self, interval: Duration) {
        (**self).fixed_tick(interval)
    }

    fn dynamic_tick(&mut self, timestep: Duration) {
        (**self).dynamic_tick(timestep)
    }
}
