//! Test utilities and mock types for Cacao development.
//!
//! Provides a virtual [`ManualClock`], a [`FixedSurface`] window
//! stand-in, scripted simulations ([`fixtures`]) and mock devices with
//! manually signalled fences and fault injection ([`devices`]).

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod devices;
pub mod fixtures;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cacao_core::{Clock, Timestamp};
use cacao_gpu::{Extent2D, SurfaceSource};

pub use devices::{
    DeviceEvent, MockDeviceHandle, MockImmediateBackend, MockImmediateDevice, MockQueuedBackend,
    MockQueuedDevice,
};
pub use fixtures::{CountingSimulation, ScriptedSimulation, TickEvent};

/// Virtual time. Starts at zero and moves only when told to.
///
/// [`Clock::sleep`] advances the clock by the requested duration and
/// returns at once, so a scheduler driven by it runs as fast as the CPU
/// allows while observing exact deadlines. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    /// Jump to an absolute offset. Moving backwards is ignored.
    pub fn set(&self, to: Duration) {
        self.nanos.fetch_max(duration_nanos(to), Ordering::SeqCst);
    }

    /// Time since the origin.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_offset(self.elapsed())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// A window whose content area only changes when the test says so.
#[derive(Debug)]
pub struct FixedSurface {
    width: AtomicU32,
    height: AtomicU32,
}

impl FixedSurface {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
    }
}

impl SurfaceSource for FixedSurface {
    fn content_area_size(&self) -> Extent2D {
        Extent2D::new(
            self.width.load(Ordering::SeqCst),
            self.height.load(Ordering::SeqCst),
        )
    }
}
