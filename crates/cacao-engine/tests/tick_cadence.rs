//! Fixed/dynamic tick cadence on a virtual clock.
//!
//! Every scenario drives the scheduler with `run_for` on a
//! `ManualClock`: ticks cost scripted virtual time and sleeping advances
//! the clock, so tick times are exact.
//!
//! **Pass criteria:**
//! - I = 20ms, dynamic cost 5ms, 100ms: exactly 5 fixed ticks, with at
//!   least one dynamic tick between each consecutive pair.
//! - A 50ms dynamic tick at I = 100ms makes the next deadline late; it is
//!   caught up once and not fired twice.
//! - A 50ms dynamic tick at I = 20ms overshoots by more than half an
//!   interval; the missed deadlines are skipped, not replayed.
//! - For any interval and elapsed time T the fixed count is
//!   floor(T / I) within one.

use std::time::Duration;

use cacao_engine::{EngineConfig, TickScheduler};
use cacao_test_utils::{ManualClock, ScriptedSimulation, TickEvent};
use proptest::prelude::*;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn config(interval: Duration) -> EngineConfig {
    EngineConfig {
        fixed_tick_interval: interval,
        ..EngineConfig::default()
    }
}

fn millis(times: &[cacao_core::Timestamp]) -> Vec<u64> {
    times.iter().map(|t| t.offset().as_millis() as u64).collect()
}

#[test]
fn five_fixed_ticks_in_a_hundred_milliseconds() {
    let clock = ManualClock::new();
    let sim = ScriptedSimulation::new(clock.clone()).with_dynamic_cost(ms(5));
    let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(ms(20))).unwrap();

    let stats = scheduler.run_for(ms(100)).unwrap();
    assert_eq!(stats.fixed, 5);
    assert_eq!(stats.late, 0);

    scheduler
        .with_state(|sim| {
            assert_eq!(millis(&sim.fixed_times()), vec![19, 39, 59, 79, 99]);

            let mut dynamic_since_fixed = 0;
            let mut seen_fixed = false;
            for event in sim.events() {
                match event {
                    TickEvent::Fixed { at } => {
                        if seen_fixed {
                            assert!(
                                dynamic_since_fixed >= 1,
                                "no dynamic tick before fixed tick at {at}"
                            );
                        }
                        seen_fixed = true;
                        dynamic_since_fixed = 0;
                    }
                    TickEvent::Dynamic { .. } => dynamic_since_fixed += 1,
                }
            }
        })
        .unwrap();
}

#[test]
fn dynamic_timestep_is_time_since_previous_dynamic_finished() {
    let clock = ManualClock::new();
    let sim = ScriptedSimulation::new(clock.clone()).with_dynamic_cost(ms(5));
    let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(ms(20))).unwrap();
    scheduler.run_for(ms(40)).unwrap();

    scheduler
        .with_state(|sim| {
            let steps: Vec<u64> = sim
                .events()
                .iter()
                .filter_map(|e| match e {
                    TickEvent::Dynamic { timestep, .. } => Some(timestep.as_millis() as u64),
                    TickEvent::Fixed { .. } => None,
                })
                .collect();
            // 0, 5, 10 back to back; the sleep to 19 and the fixed tick
            // put 4ms between 15 and the next dynamic tick.
            assert_eq!(&steps[..5], &[0, 0, 0, 4, 0]);
        })
        .unwrap();
}

#[test]
fn late_deadline_after_spike_is_caught_up_once() {
    let clock = ManualClock::new();
    // Dynamic ticks start every 5ms; the 17th (at 80ms) takes 50ms and
    // runs past the 100ms deadline by 30ms.
    let sim = ScriptedSimulation::new(clock.clone())
        .with_dynamic_cost(ms(5))
        .with_dynamic_override(16, ms(50));
    let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(ms(100))).unwrap();

    let stats = scheduler.run_for(ms(210)).unwrap();
    assert_eq!(stats.catch_up, 1);
    assert_eq!(stats.late, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.fixed, 2);

    let times = scheduler.with_state(|sim| millis(&sim.fixed_times())).unwrap();
    assert_eq!(times, vec![130, 199]);
}

#[test]
fn deadlines_missed_by_half_an_interval_are_skipped() {
    let clock = ManualClock::new();
    // The 6th dynamic tick starts at 29ms and ends at 79ms, past the
    // 40ms and 60ms deadlines.
    let sim = ScriptedSimulation::new(clock.clone())
        .with_dynamic_cost(ms(5))
        .with_dynamic_override(5, ms(50));
    let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(ms(20))).unwrap();

    let stats = scheduler.run_for(ms(140)).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.late, 1);
    assert_eq!(stats.catch_up, 0);

    let times = scheduler.with_state(|sim| millis(&sim.fixed_times())).unwrap();
    assert_eq!(times, vec![19, 79, 99, 119, 139]);
    assert!(times.windows(2).all(|w| w[1] - w[0] >= 18), "double fire: {times:?}");
}

#[test]
fn stale_window_lets_expensive_dynamic_ticks_through() {
    let clock = ManualClock::new();
    // 12ms never fits in a 10ms interval once the window has learned
    // the cost; only a stale reset lets another one run.
    let sim = ScriptedSimulation::new(clock.clone()).with_dynamic_cost(ms(12));
    let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(ms(10))).unwrap();

    let stats = scheduler.run_for(ms(1000)).unwrap();
    assert!(stats.fixed >= 90, "fixed ticks starved: {stats:?}");
    assert!(stats.window_resets > 0);
    assert!(stats.dynamic < stats.fixed);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn fixed_count_tracks_elapsed_time(
        interval_ms in 5u64..=50,
        cost_share in 1u64..=100,
        periods in 1u64..=50,
        fraction in 0u64..100,
    ) {
        let interval = ms(interval_ms);
        let cost = Duration::from_micros((interval_ms * 1000 * cost_share / 300).max(1000));
        let elapsed = interval * periods as u32 + interval * fraction as u32 / 100;

        let clock = ManualClock::new();
        let sim = ScriptedSimulation::new(clock.clone()).with_dynamic_cost(cost);
        let mut scheduler = TickScheduler::new(sim, clock.clone(), &config(interval)).unwrap();
        let stats = scheduler.run_for(elapsed).unwrap();

        let expected = (elapsed.as_nanos() / interval.as_nanos()) as u64;
        prop_assert!(
            stats.fixed + 1 >= expected && stats.fixed <= expected + 1,
            "I={interval:?} T={elapsed:?} cost={cost:?}: {} fixed ticks, expected {expected}",
            stats.fixed
        );
        prop_assert_eq!(stats.skipped, 0);
    }
}
