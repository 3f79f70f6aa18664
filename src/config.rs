//! Session timing configuration parsed from environment variables.
//!
//! Every timer the session arms has a default here; each can be overridden
//! with a `VMT_*` variable. Unparseable values fall back to the default.

use std::time::Duration;

pub const DEFAULT_CONTROL_IDLE_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 100;
pub const DEFAULT_HEARTBEAT_WATCHDOG_MS: u64 = 150_001;
pub const DEFAULT_RESIZE_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_SNAPSHOT_DEBOUNCE_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Inactivity after which held control is released automatically.
    pub control_idle: Duration,
    /// Period of the heartbeat ping.
    pub heartbeat_interval: Duration,
    /// Round trips above this are classified `Bad`.
    pub latency_threshold: Duration,
    /// No successful round trip within this window marks the connection `Error`.
    pub heartbeat_watchdog: Duration,
    /// Quiet period after the last window resize before referencing resumes.
    pub resize_debounce: Duration,
    /// Delay between a snapshot request and the start of its capture.
    pub snapshot_debounce: Duration,
}

impl SessionConfig {
    /// Build session timing from environment variables.
    ///
    /// Optional:
    /// - `VMT_CONTROL_IDLE_SECS`: default 60
    /// - `VMT_HEARTBEAT_INTERVAL_MS`: default 5000
    /// - `VMT_LATENCY_THRESHOLD_MS`: default 100
    /// - `VMT_HEARTBEAT_WATCHDOG_MS`: default 150001
    /// - `VMT_RESIZE_DEBOUNCE_MS`: default 500
    /// - `VMT_SNAPSHOT_DEBOUNCE_MS`: default 250
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            control_idle: Duration::from_secs(env_parse("VMT_CONTROL_IDLE_SECS", DEFAULT_CONTROL_IDLE_SECS)),
            heartbeat_interval: Duration::from_millis(env_parse(
                "VMT_HEARTBEAT_INTERVAL_MS",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )),
            latency_threshold: Duration::from_millis(env_parse(
                "VMT_LATENCY_THRESHOLD_MS",
                DEFAULT_LATENCY_THRESHOLD_MS,
            )),
            heartbeat_watchdog: Duration::from_millis(env_parse(
                "VMT_HEARTBEAT_WATCHDOG_MS",
                DEFAULT_HEARTBEAT_WATCHDOG_MS,
            )),
            resize_debounce: Duration::from_millis(env_parse("VMT_RESIZE_DEBOUNCE_MS", DEFAULT_RESIZE_DEBOUNCE_MS)),
            snapshot_debounce: Duration::from_millis(env_parse(
                "VMT_SNAPSHOT_DEBOUNCE_MS",
                DEFAULT_SNAPSHOT_DEBOUNCE_MS,
            )),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_idle: Duration::from_secs(DEFAULT_CONTROL_IDLE_SECS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            latency_threshold: Duration::from_millis(DEFAULT_LATENCY_THRESHOLD_MS),
            heartbeat_watchdog: Duration::from_millis(DEFAULT_HEARTBEAT_WATCHDOG_MS),
            resize_debounce: Duration::from_millis(DEFAULT_RESIZE_DEBOUNCE_MS),
            snapshot_debounce: Duration::from_millis(DEFAULT_SNAPSHOT_DEBOUNCE_MS),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
