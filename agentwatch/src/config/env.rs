//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for AGENTWATCH environment variables that
//! collects every problem it finds so all issues can be reported at once.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser.
///
/// Invalid values fall back to the supplied default and are recorded.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the AGENTWATCH_ prefix.
    pub fn new() -> Self {
        Self::with_prefix("AGENTWATCH_")
    }

    /// Create a parser for a different variable prefix.
    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a duration in humantime notation (`250ms`, `2m`, `1h 30s`).
    ///
    /// A bare integer is read as milliseconds.
    pub fn get_duration(&mut self, name: &str, default: Duration) -> Duration {
        let var_name = self.var_name(name);
        let Ok(value) = env::var(&var_name) else {
            return default;
        };

        let trimmed = value.trim();
        if let Ok(ms) = trimmed.parse::<u64>() {
            return Duration::from_millis(ms);
        }
        match humantime::parse_duration(trimmed) {
            Ok(duration) => duration,
            Err(_) => {
                self.errors.push(EnvError::InvalidDuration {
                    var: var_name,
                    value,
                });
                default
            }
        }
    }

    /// Get a u32 value with default and range validation.
    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> u32 {
        let var_name = self.var_name(name);
        let Ok(value) = env::var(&var_name) else {
            return default;
        };

        match value.trim().parse::<u32>() {
            Ok(n) if (min..=max).contains(&n) => n,
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                default
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 32-bit integer".to_string(),
                    value,
                });
                default
            }
        }
    }
}
