//! Error types for watch and wait operations.

use std::time::Duration;

/// Error type for log watching and eventual-condition waits.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The wait's timeout elapsed before the condition held.
    #[error("Deadline exceeded after {timeout:?}; still waiting for: {}", .missing.join(", "))]
    DeadlineExceeded {
        timeout: Duration,
        missing: Vec<String>,
    },

    /// The caller's cancellation token fired before the condition held.
    #[error("Wait cancelled; still waiting for: {}", .missing.join(", "))]
    Cancelled { missing: Vec<String> },

    /// The target list handed to a watcher is unusable.
    #[error("Invalid target set: {0}")]
    InvalidTargetSet(String),
}

impl WatchError {
    /// Keys (or condition descriptions) that were still outstanding when the
    /// wait gave up. Empty for construction errors.
    pub fn missing(&self) -> &[String] {
        match self {
            Self::DeadlineExceeded { missing, .. } | Self::Cancelled { missing } => missing,
            Self::InvalidTargetSet(_) => &[],
        }
    }

    /// True when the error is a timeout.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// True when the error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type for watch operations
pub type WatchResult<T> = Result<T, WatchError>;
