//! Configuration for watchers and waits.
//!
//! Defaults match the polling cadence integration suites use against a
//! freshly started agent; every value can be overridden from the
//! environment via [`WatchConfig::from_env`].

pub mod env;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use env::{EnvError, EnvParser};

/// Default interval between predicate evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default upper bound for a wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default number of recent output records kept for diagnostics.
pub const DEFAULT_TAIL_LINES: u32 = 64;

const MAX_TAIL_LINES: u32 = 100_000;

/// Tunables shared by [`crate::LogWatcher`] and the polling helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval between predicate evaluations.
    #[serde(with = "humantime_serde_compat")]
    pub poll_interval: Duration,
    /// Upper bound for a wait.
    #[serde(with = "humantime_serde_compat")]
    pub wait_timeout: Duration,
    /// Recent output records retained by a watcher; zero disables the tail.
    pub tail_lines: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

impl WatchConfig {
    /// Load from `AGENTWATCH_*` variables, returning the config together with
    /// every parse problem. Invalid values keep their defaults.
    pub fn from_env_with_errors() -> (Self, Vec<EnvError>) {
        let mut parser = EnvParser::new();
        let config = Self::from_parser(&mut parser);
        (config, parser.take_errors())
    }

    /// Load from `AGENTWATCH_*` variables, logging any parse problems.
    pub fn from_env() -> Self {
        let (config, errors) = Self::from_env_with_errors();
        for error in &errors {
            warn!(%error, "Ignoring invalid watch configuration value");
        }
        config
    }

    /// Load using an existing parser (so callers can choose the prefix).
    pub fn from_parser(parser: &mut EnvParser) -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: parser.get_duration("POLL_INTERVAL", defaults.poll_interval),
            wait_timeout: parser.get_duration("WAIT_TIMEOUT", defaults.wait_timeout),
            tail_lines: parser.get_u32_range("TAIL_LINES", defaults.tail_lines, 0, MAX_TAIL_LINES),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tail_lines(mut self, lines: u32) -> Self {
        self.tail_lines = lines;
        self
    }
}

// Durations serialize as humantime strings ("500ms", "10m").
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    fn set_env(key: &str, value: &str) {
        // SAFETY: env access is serialized by env_test_lock
        unsafe { std::env::set_var(key, value) };
    }

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: env access is serialized by env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    const VARS: [&str; 3] = [
        "AGENTWATCH_POLL_INTERVAL",
        "AGENTWATCH_WAIT_TIMEOUT",
        "AGENTWATCH_TAIL_LINES",
    ];

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.wait_timeout, Duration::from_secs(600));
        assert_eq!(config.tail_lines, 64);
    }

    #[test]
    fn test_from_env_overrides() {
        let _guard = env_test_lock();
        set_env(VARS[0], "100ms");
        set_env(VARS[1], "30s");
        set_env(VARS[2], "5");

        let (config, errors) = WatchConfig::from_env_with_errors();
        assert!(errors.is_empty());
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.wait_timeout, Duration::from_secs(30));
        assert_eq!(config.tail_lines, 5);

        cleanup_env(&VARS);
    }

    #[test]
    fn test_from_env_reports_every_bad_value() {
        let _guard = env_test_lock();
        set_env(VARS[0], "fast");
        set_env(VARS[1], "forever");
        set_env(VARS[2], "999999999");

        let (config, errors) = WatchConfig::from_env_with_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(config, WatchConfig::default());

        cleanup_env(&VARS);
    }

    #[test]
    fn test_serde_uses_humantime_strings() {
        let config = WatchConfig::default()
            .with_poll_interval(Duration::from_millis(250))
            .with_tail_lines(0);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], "250ms");
        assert_eq!(json["wait_timeout"], "10m");
        assert_eq!(json["tail_lines"], 0);

        let back: WatchConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
