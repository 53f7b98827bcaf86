//! Drift-corrected tick timing.
//!
//! [`TickClock`] owns every timing decision the scheduler makes: when a
//! fixed tick is due, whether a late one is caught up or skipped, whether
//! there is room for a dynamic tick before the next deadline, and how
//! long to sleep otherwise. It holds no simulation state and never
//! reads a clock itself; the caller passes `now` in.

use std::time::Duration;

use cacao_core::Timestamp;

use crate::config::EngineConfig;

/// Number of dynamic-tick durations in the rolling cost window.
pub const DYNAMIC_WINDOW: usize = 3;

/// Length of the late-tick accounting window.
pub const MISS_WINDOW: Duration = Duration::from_secs(60);

/// What to do about the fixed tick at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixedDecision {
    /// Within the grace window of the deadline: run it.
    OnTime,
    /// Late by less than half an interval: run it anyway.
    CatchUp {
        /// How far past the deadline.
        late: Duration,
    },
    /// Late by half an interval or more: drop it.
    Skip {
        /// How far past the deadline.
        late: Duration,
    },
    /// The deadline has not arrived yet.
    NotDue,
}

impl FixedDecision {
    /// Whether the fixed tick should execute.
    pub fn runs(self) -> bool {
        matches!(self, FixedDecision::OnTime | FixedDecision::CatchUp { .. })
    }
}

// ── MissTracker ──────────────────────────────────────────────────

/// Per-minute count of late or skipped fixed ticks.
///
/// Warns once per window when the count exceeds `threshold`.
#[derive(Clone, Debug)]
struct MissTracker {
    window_start: Timestamp,
    misses: u64,
    threshold: u64,
    percent: f64,
    warned: bool,
}

impl MissTracker {
    fn new(interval: Duration, ratio: f64, now: Timestamp) -> Self {
        let expected = MISS_WINDOW.as_secs_f64() / interval.as_secs_f64();
        // Round off float noise first so 60 * 0.05 is 3, not 4.
        let allowed = ((expected * ratio) * 1e9).round() / 1e9;
        Self {
            window_start: now,
            misses: 0,
            threshold: allowed.ceil() as u64,
            percent: ratio * 100.0,
            warned: false,
        }
    }

    /// Count one miss. Returns true if this miss triggered the warning.
    fn record(&mut self, now: Timestamp) -> bool {
        if now.saturating_since(self.window_start) >= MISS_WINDOW {
            self.window_start = now;
            self.misses = 0;
            self.warned = false;
        }
        self.misses += 1;
        if self.misses > self.threshold && !self.warned {
            self.warned = true;
            tracing::warn!(
                misses = self.misses,
                threshold = self.threshold,
                "{}% of fixed ticks in the last minute were late or missed",
                self.percent
            );
            return true;
        }
        false
    }
}

// ── TickClock ────────────────────────────────────────────────────

/// Timing state for one scheduler run.
///
/// Created by every start of the scheduler: the first fixed deadline is
/// one interval after `now`, and the previous dynamic tick is taken to
/// have finished at `now`.
#[derive(Clone, Debug)]
pub struct TickClock {
    interval: Duration,
    grace: Duration,
    stale_after: Duration,
    next_fixed: Timestamp,
    last_dynamic: Timestamp,
    window: [Duration; DYNAMIC_WINDOW],
    cursor: usize,
    misses: MissTracker,
}

impl TickClock {
    /// Timing state for a run starting at `now`.
    ///
    /// `config` is assumed valid.
    pub fn new(config: &EngineConfig, now: Timestamp) -> Self {
        let interval = config.fixed_tick_interval;
        Self {
            interval,
            grace: config.grace_window,
            stale_after: interval.saturating_mul(config.stale_window_factor),
            next_fixed: now + interval,
            last_dynamic: now,
            window: [Duration::ZERO; DYNAMIC_WINDOW],
            cursor: 0,
            misses: MissTracker::new(interval, config.late_warning_ratio, now),
        }
    }

    /// The fixed tick cadence.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline of the next fixed tick.
    pub fn next_fixed(&self) -> Timestamp {
        self.next_fixed
    }

    /// Decide about the fixed tick and advance the deadline if it was
    /// due.
    ///
    /// On time: the deadline moves forward by exactly one interval, so
    /// the cadence never drifts. Late beyond the grace window: the
    /// deadline moves to the next interval boundary strictly after
    /// `now` and the miss is counted.
    pub fn decide_fixed(&mut self, now: Timestamp) -> FixedDecision {
        let earliest = Timestamp::from_offset(self.next_fixed.offset().saturating_sub(self.grace));
        if now < earliest {
            return FixedDecision::NotDue;
        }
        if now <= self.next_fixed + self.grace {
            self.next_fixed += self.interval;
            return FixedDecision::OnTime;
        }

        let late = now.saturating_since(self.next_fixed);
        let boundaries = late.as_nanos() / self.interval.as_nanos() + 1;
        let step = u64::try_from(self.interval.as_nanos().saturating_mul(boundaries))
            .unwrap_or(u64::MAX);
        self.next_fixed += Duration::from_nanos(step);
        self.misses.record(now);

        if late < self.interval / 2 {
            FixedDecision::CatchUp { late }
        } else {
            FixedDecision::Skip { late }
        }
    }

    /// Time left before the next fixed deadline (zero if past it).
    pub fn until_fixed(&self, now: Timestamp) -> Duration {
        self.next_fixed.saturating_since(now)
    }

    /// Mean of the last [`DYNAMIC_WINDOW`] dynamic-tick durations.
    pub fn rolling_average(&self) -> Duration {
        self.window.iter().sum::<Duration>() / DYNAMIC_WINDOW as u32
    }

    /// Whether a dynamic tick is expected to finish before the next
    /// fixed deadline.
    pub fn dynamic_due(&self, now: Timestamp) -> bool {
        self.rolling_average() < self.until_fixed(now)
    }

    /// Timestep for a dynamic tick starting at `now`: time since the
    /// previous dynamic tick finished.
    pub fn dynamic_timestep(&self, now: Timestamp) -> Duration {
        now.saturating_since(self.last_dynamic)
    }

    /// Push the duration of a dynamic tick into the window, dropping
    /// the oldest.
    pub fn record_dynamic(&mut self, started: Timestamp, finished: Timestamp) {
        self.window[self.cursor] = finished.saturating_since(started);
        self.cursor = (self.cursor + 1) % DYNAMIC_WINDOW;
        self.last_dynamic = finished;
    }

    /// Clear the cost window if no dynamic tick has run for the stale
    /// period. Returns how long it has been since the last one when a
    /// reset happened.
    ///
    /// A window that is already empty is left alone, so one stall
    /// produces one reset.
    pub fn reset_if_stale(&mut self, now: Timestamp) -> Option<Duration> {
        let behind = now.saturating_since(self.last_dynamic);
        if behind < self.stale_after || self.window.iter().all(Duration::is_zero) {
            return None;
        }
        self.window = [Duration::ZERO; DYNAMIC_WINDOW];
        self.cursor = 0;
        Some(behind)
    }

    /// How long to sleep from `now`: until one grace window before the
    /// next fixed deadline.
    pub fn sleep_target(&self, now: Timestamp) -> Duration {
        self.next_fixed
            .offset()
            .saturating_sub(self.grace)
            .saturating_sub(now.offset())
    }

    /// Late or skipped fixed ticks in the current accounting window.
    pub fn misses_this_window(&self) -> u64 {
        self.misses.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn at(n: u64) -> Timestamp {
        Timestamp::from_offset(ms(n))
    }

    fn clock(interval: u64) -> TickClock {
        let config = EngineConfig {
            fixed_tick_interval: ms(interval),
            ..EngineConfig::default()
        };
        TickClock::new(&config, Timestamp::ZERO)
    }

    #[test]
    fn first_deadline_is_one_interval_out() {
        let tc = clock(20);
        assert_eq!(tc.next_fixed(), at(20));
        assert_eq!(tc.clone().decide_fixed(at(18)), FixedDecision::NotDue);
    }

    #[test]
    fn grace_window_counts_as_on_time() {
        for now in [19, 20, 21] {
            let mut tc = clock(20);
            assert_eq!(tc.decide_fixed(at(now)), FixedDecision::OnTime, "at {now}ms");
            assert_eq!(tc.next_fixed(), at(40));
        }
    }

    #[test]
    fn slightly_late_tick_is_caught_up() {
        let mut tc = clock(20);
        assert_eq!(
            tc.decide_fixed(at(29)),
            FixedDecision::CatchUp { late: ms(9) }
        );
        assert_eq!(tc.next_fixed(), at(40));
        assert_eq!(tc.misses_this_window(), 1);
    }

    #[test]
    fn very_late_tick_is_skipped_to_next_future_boundary() {
        let mut tc = clock(20);
        assert_eq!(tc.decide_fixed(at(79)), FixedDecision::Skip { late: ms(59) });
        assert_eq!(tc.next_fixed(), at(80));

        let mut tc = clock(20);
        assert_eq!(tc.decide_fixed(at(60)), FixedDecision::Skip { late: ms(40) });
        assert_eq!(tc.next_fixed(), at(80));
    }

    #[test]
    fn rolling_average_drops_oldest() {
        let mut tc = clock(20);
        tc.record_dynamic(at(0), at(3));
        tc.record_dynamic(at(3), at(6));
        tc.record_dynamic(at(6), at(9));
        assert_eq!(tc.rolling_average(), ms(3));
        tc.record_dynamic(at(9), at(18));
        assert_eq!(tc.rolling_average(), ms(5));
        assert_eq!(tc.dynamic_timestep(at(20)), ms(2));
    }

    #[test]
    fn dynamic_tick_needs_strictly_more_room_than_average() {
        let mut tc = clock(20);
        for i in 0..3 {
            tc.record_dynamic(at(i * 5), at(i * 5 + 5));
        }
        assert!(tc.dynamic_due(at(14)));
        assert!(!tc.dynamic_due(at(15)));
    }

    #[test]
    fn stale_window_resets_once() {
        let mut tc = clock(20);
        tc.record_dynamic(at(0), at(15));
        assert_eq!(tc.reset_if_stale(at(39)), None);
        assert_eq!(tc.reset_if_stale(at(55)), Some(ms(40)));
        assert_eq!(tc.rolling_average(), Duration::ZERO);
        assert_eq!(tc.reset_if_stale(at(80)), None);
    }

    #[test]
    fn sleep_target_stops_short_by_grace() {
        let tc = clock(20);
        assert_eq!(tc.sleep_target(at(15)), ms(4));
        assert_eq!(tc.sleep_target(at(19)), Duration::ZERO);
    }

    #[test]
    fn warning_threshold_follows_ratio() {
        let tracker = MissTracker::new(ms(20), 0.05, Timestamp::ZERO);
        assert_eq!(tracker.threshold, 150);
        let tracker = MissTracker::new(ms(1000), 0.05, Timestamp::ZERO);
        assert_eq!(tracker.threshold, 3);
    }

    #[test]
    fn miss_warning_fires_once_per_minute() {
        let mut tracker = MissTracker::new(ms(1000), 0.05, Timestamp::ZERO);
        let fired: Vec<bool> = (0..6).map(|i| tracker.record(at(i * 100))).collect();
        assert_eq!(fired, vec![false, false, false, true, false, false]);

        // A new window starts clean.
        let fired: Vec<bool> = (0..4)
            .map(|i| tracker.record(at(60_000 + i * 100)))
            .collect();
        assert_eq!(fired, vec![false, false, false, true]);
    }
}
