//! Engine configuration, validation, and the TOML file form.
//!
//! [`EngineConfig`] is plain data with defaults for every field.
//! [`validate()`](EngineConfig::validate) checks the timing invariants
//! the scheduler relies on; everything that takes a config calls it.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors detected by [`EngineConfig::validate()`] or while parsing.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// The fixed tick interval is zero.
    #[error("fixed_tick_interval must be non-zero")]
    ZeroInterval,
    /// The grace window is not below half the interval.
    #[error("grace_window {grace:?} must be less than half of fixed_tick_interval {interval:?}")]
    GraceTooLarge {
        /// Configured grace window.
        grace: Duration,
        /// Configured interval.
        interval: Duration,
    },
    /// The stale window factor is zero.
    #[error("stale_window_factor must be at least 1")]
    ZeroStaleFactor,
    /// The late-tick warning ratio is not in `(0, 1]`.
    #[error("late_warning_ratio must be in (0, 1], got {value}")]
    InvalidWarningRatio {
        /// The rejected ratio.
        value: f64,
    },
    /// No backend to try.
    #[error("backend_preference is empty and no backend was requested")]
    EmptyBackendPreference,
    /// `max_frames_in_flight` is `Some(0)`.
    #[error("max_frames_in_flight must be at least 1")]
    ZeroFramesInFlight,
    /// The TOML source could not be parsed.
    #[error("invalid engine config file: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },
}

// ── EngineConfig ─────────────────────────────────────────────────

/// Configuration consumed by the engine root and its components.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Fixed tick cadence. Default: 20ms.
    pub fixed_tick_interval: Duration,
    /// How far from its deadline a fixed tick still counts as on time.
    /// Default: 1ms. Must be below half the interval.
    pub grace_window: Duration,
    /// Multiple of the interval after which an idle dynamic-tick cost
    /// window is considered stale and reset. Default: 2.
    pub stale_window_factor: u32,
    /// Share of late or missed fixed ticks per minute above which one
    /// warning is logged. Default: 0.05.
    pub late_warning_ratio: f64,
    /// Backend module names, most preferred first.
    /// Default: `["queued", "immediate"]`.
    pub backend_preference: Vec<String>,
    /// Backend to try before the preference list.
    pub requested_backend: Option<String>,
    /// Initial vsync setting. Default: true.
    pub vsync: bool,
    /// Cap on outstanding frames. `None` = one per swapchain image.
    pub max_frames_in_flight: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_tick_interval: Duration::from_millis(20),
            grace_window: Duration::from_millis(1),
            stale_window_factor: 2,
            late_warning_ratio: 0.05,
            backend_preference: vec!["queued".into(), "immediate".into()],
            requested_backend: None,
            vsync: true,
            max_frames_in_flight: None,
        }
    }
}

impl EngineConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.grace_window * 2 >= self.fixed_tick_interval {
            return Err(ConfigError::GraceTooLarge {
                grace: self.grace_window,
                interval: self.fixed_tick_interval,
            });
        }
        if self.stale_window_factor == 0 {
            return Err(ConfigError::ZeroStaleFactor);
        }
        let ratio = self.late_warning_ratio;
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
            return Err(ConfigError::InvalidWarningRatio { value: ratio });
        }
        if self.backend_preference.is_empty() && self.requested_backend.is_none() {
            return Err(ConfigError::EmptyBackendPreference);
        }
        if self.max_frames_in_flight == Some(0) {
            return Err(ConfigError::ZeroFramesInFlight);
        }
        Ok(())
    }

    /// Backends in the order they should be tried: the requested one
    /// first, then the preference list without duplicates.
    pub fn backend_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.requested_backend.iter().cloned().collect();
        for name in &self.backend_preference {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    /// Parse the TOML file form and validate it.
    ///
    /// Durations are given in milliseconds; missing keys take their
    /// defaults:
    ///
    /// ```toml
    /// fixed_tick_interval_ms = 20
    /// grace_window_ms = 1
    /// backend_preference = ["queued", "immediate"]
    /// vsync = false
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let config = EngineConfig::from(file);
        config.validate()?;
        Ok(config)
    }
}

// ── File form ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    fixed_tick_interval_ms: u64,
    grace_window_ms: u64,
    stale_window_factor: u32,
    late_warning_ratio: f64,
    backend_preference: Vec<String>,
    requested_backend: Option<String>,
    vsync: bool,
    max_frames_in_flight: Option<usize>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            fixed_tick_interval_ms: millis(d.fixed_tick_interval),
            grace_window_ms: millis(d.grace_window),
            stale_window_factor: d.stale_window_factor,
            late_warning_ratio: d.late_warning_ratio,
            backend_preference: d.backend_preference,
            requested_backend: d.requested_backend,
            vsync: d.vsync,
            max_frames_in_flight: d.max_frames_in_flight,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl From<ConfigFile> for EngineConfig {
    fn from(f: ConfigFile) -> Self {
        Self {
            fixed_tick_interval: Duration::from_millis(f.fixed_tick_interval_ms),
            grace_window: Duration::from_millis(f.grace_window_ms),
            stale_window_factor: f.stale_window_factor,
            late_warning_ratio: f.late_warning_ratio,
            backend_preference: f.backend_preference,
            requested_backend: f.requested_backend,
            vsync: f.vsync,
            max_frames_in_flight: f.max_frames_in_flight,
        }
    }
}
