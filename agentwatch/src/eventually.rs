//! Retry-until-true polling with a deadline and cooperative cancellation.
//!
//! The predicate runs once immediately, then once per `interval` until it
//! returns true, the timeout elapses, or the cancellation token fires.
//! Sleeps are capped at the deadline so the last evaluation lands on it,
//! even if the timer wakes slightly late. No sleep is scheduled once the
//! deadline has passed, and no evaluation is started once the token is
//! cancelled. An evaluation already running is allowed to finish.
//!
//! Everything is driven by `tokio::time`, so a paused test clock makes the
//! number of evaluations a pure function of `timeout`, `interval`, and the
//! predicate's answers.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{WatchError, WatchResult};

/// Intervals below this are raised to it so an always-false predicate
/// cannot spin the executor.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Terminal state of one polling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The predicate returned true before the deadline.
    Succeeded,
    /// The deadline elapsed first.
    TimedOut,
    /// The cancellation token fired first.
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of an [`eventually`] call plus counters for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventuallyResult {
    pub outcome: Outcome,
    /// Number of predicate evaluations performed.
    pub attempts: u32,
    /// Wall time from the start of the call to its return.
    pub elapsed: Duration,
    /// Timeout the call was made with.
    pub timeout: Duration,
    /// Most recent evaluation error, only filled by [`eventually_ok`].
    pub last_error: Option<String>,
}

impl EventuallyResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    /// Convert to a `Result`, naming the condition that never held.
    pub fn into_result(self, description: impl Into<String>) -> WatchResult<()> {
        let mut what = description.into();
        if let Some(err) = &self.last_error {
            what = format!("{what} (last error: {err})");
        }
        match self.outcome {
            Outcome::Succeeded => Ok(()),
            Outcome::TimedOut => Err(WatchError::DeadlineExceeded {
                timeout: self.timeout,
                missing: vec![what],
            }),
            Outcome::Cancelled => Err(WatchError::Cancelled {
                missing: vec![what],
            }),
        }
    }
}

/// Poll a synchronous predicate until it holds.
pub async fn eventually<F>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> EventuallyResult
where
    F: FnMut() -> bool,
{
    eventually_async(
        move || std::future::ready(predicate()),
        timeout,
        interval,
        cancel,
    )
    .await
}

/// Poll a fallible predicate until it returns `Ok(true)`.
///
/// `Err` is treated as "not yet": typical for probes that fail to connect
/// until the process under test is listening. The last error is kept on the
/// result so a failing caller can report it.
pub async fn eventually_ok<F, E>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> EventuallyResult
where
    F: FnMut() -> Result<bool, E>,
    E: Display,
{
    let mut last_error = None;
    let mut result = eventually(
        || match predicate() {
            Ok(ready) => ready,
            Err(error) => {
                debug!(%error, "Predicate evaluation failed; treating as not ready");
                last_error = Some(error.to_string());
                false
            }
        },
        timeout,
        interval,
        cancel,
    )
    .await;
    result.last_error = last_error;
    result
}

/// Poll an asynchronous predicate until it holds.
///
/// The predicate's future is awaited to completion on every attempt;
/// cancellation is only observed between attempts.
pub async fn eventually_async<F, Fut>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> EventuallyResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let interval = interval.max(MIN_INTERVAL);
    let start = Instant::now();
    // An unrepresentable deadline means "never".
    let deadline = start.checked_add(timeout);
    let mut attempts: u32 = 0;

    let finish = |outcome: Outcome, attempts: u32| {
        let result = EventuallyResult {
            outcome,
            attempts,
            elapsed: start.elapsed(),
            timeout,
            last_error: None,
        };
        debug!(
            outcome = %result.outcome,
            attempts = result.attempts,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Polling finished"
        );
        result
    };

    if cancel.is_cancelled() {
        return finish(Outcome::Cancelled, attempts);
    }

    loop {
        attempts = attempts.saturating_add(1);
        if predicate().await {
            return finish(Outcome::Succeeded, attempts);
        }

        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            return finish(Outcome::TimedOut, attempts);
        }

        let next = now.checked_add(interval);
        let wake = match (next, deadline) {
            (Some(next), Some(deadline)) => next.min(deadline),
            (Some(next), None) => next,
            (None, Some(deadline)) => deadline,
            (None, None) => {
                cancel.cancelled().await;
                return finish(Outcome::Cancelled, attempts);
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return finish(Outcome::Cancelled, attempts),
            _ = sleep_until(wake) => {}
        }

        // `wake` never passes the deadline, so the slot it was scheduled for
        // still gets its evaluation even when the timer fires late.
        if cancel.is_cancelled() {
            return finish(Outcome::Cancelled, attempts);
        }
    }
}
