//! Monotonic time source used by all tick timing.
//!
//! The scheduler never calls `Instant::now()` directly. It reads a
//! [`Clock`], so tests and benches can drive it with virtual time and
//! assert exact tick counts.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::thread;
use std::time::{Duration, Instant};

/// A point in time, measured from the origin of the [`Clock`] that
/// produced it.
///
/// Timestamps from different clocks are not comparable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// A timestamp `offset` after the clock origin.
    pub const fn from_offset(offset: Duration) -> Self {
        Self(offset)
    }

    /// Time elapsed since the clock origin.
    pub const fn offset(self) -> Duration {
        self.0
    }

    /// `self - earlier`, or zero if `earlier` is later than `self`.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// `self - earlier`, or `None` if `earlier` is later than `self`.
    pub fn checked_since(self, earlier: Timestamp) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A monotonic clock that can also put the calling thread to sleep.
///
/// `sleep` may return early: callers must re-read [`now`](Clock::now)
/// after waking instead of assuming the full duration elapsed.
pub trait Clock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Timestamp;

    /// Block the calling thread for up to `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by [`Instant`].
///
/// Sleeps with [`thread::park_timeout`], so another thread can cut a
/// sleep short with `Thread::unpark` (used on stop and on snapshot
/// requests).
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// A clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::park_timeout(duration);
        }
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}
