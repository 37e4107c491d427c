//! Concurrent log watcher.
//!
//! A [`LogWatcher`] owns a [`KeySet`] and consumes one or more output
//! streams on background tasks, one record (line) at a time. Each record is
//! checked against every still-unseen key by substring containment. Queries
//! run against atomic flags, so callers never contend with the consumer.
//!
//! Consumption always runs to end of stream, even after every key is seen,
//! so the producing process never blocks on a full pipe.
//!
//! ```ignore
//! let watcher = LogWatcher::new(["all precondition checks are now satisfied"])?;
//! let mut child = Command::new(apm_path).stdout(Stdio::piped()).spawn()?;
//! watcher.attach_child(&mut child);
//! watcher
//!     .wait_for_keys(&["all precondition checks are now satisfied"], timeout, interval, &cancel)
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::WatchConfig;
use crate::error::{WatchError, WatchResult};
use crate::eventually::{Outcome, eventually};
use crate::keyset::{KeySet, KeyState};

#[derive(Debug)]
struct Inner {
    keys: KeySet,
    config: WatchConfig,
    records: AtomicU64,
    tail: Mutex<VecDeque<String>>,
}

impl Inner {
    fn consume(&self, source: &str, record: &[u8]) {
        let line = trim_line_ending(record);
        self.records.fetch_add(1, Ordering::Relaxed);
        trace!(source, line = %String::from_utf8_lossy(line), "Watched record");

        for key in self.keys.scan_collect(line) {
            debug!(source, key, "Watched key observed");
        }

        let capacity = self.config.tail_lines as usize;
        if capacity > 0 {
            let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == capacity {
                tail.pop_front();
            }
            tail.push_back(String::from_utf8_lossy(line).into_owned());
        }
    }

    /// Apply one `read_until` result. Returns false once the stream is done.
    fn absorb(
        &self,
        source: &str,
        read: std::io::Result<usize>,
        record: &[u8],
        consumed: &mut u64,
    ) -> bool {
        match read {
            Ok(0) => false,
            Ok(_) => {
                self.consume(source, record);
                *consumed += 1;
                true
            }
            Err(error) => {
                warn!(source, %error, "Stopped reading watched stream");
                false
            }
        }
    }
}

/// Final flag state plus recent output, for failure messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchReport {
    pub keys: Vec<KeyState>,
    pub records_seen: u64,
    pub recent_lines: Vec<String>,
}

impl std::fmt::Display for WatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "records consumed: {}", self.records_seen)?;
        for state in &self.keys {
            let mark = if state.seen { "seen" } else { "MISSING" };
            writeln!(f, "  [{mark}] {}", state.key)?;
        }
        if !self.recent_lines.is_empty() {
            writeln!(f, "last {} records:", self.recent_lines.len())?;
            for line in &self.recent_lines {
                writeln!(f, "  | {line}")?;
            }
        }
        Ok(())
    }
}

fn trim_line_ending(record: &[u8]) -> &[u8] {
    let record = record.strip_suffix(b"\n").unwrap_or(record);
    record.strip_suffix(b"\r").unwrap_or(record)
}

/// Watches text streams for a fixed set of substrings.
///
/// Cloning is cheap and every clone shares the same flags.
#[derive(Debug, Clone)]
pub struct LogWatcher {
    inner: Arc<Inner>,
}

impl LogWatcher {
    /// Create a watcher with default configuration.
    ///
    /// Fails with [`WatchError::InvalidTargetSet`] for an empty list or an
    /// empty target; duplicates are dropped.
    pub fn new<I, S>(targets: I) -> WatchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(targets, WatchConfig::default())
    }

    /// Create a watcher with explicit configuration.
    pub fn with_config<I, S>(targets: I, config: WatchConfig) -> WatchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = KeySet::new(targets)?;
        let tail = VecDeque::with_capacity((config.tail_lines as usize).min(1024));
        Ok(Self {
            inner: Arc::new(Inner {
                keys,
                config,
                records: AtomicU64::new(0),
                tail: Mutex::new(tail),
            }),
        })
    }

    /// The watched keys and their flags.
    pub fn keys(&self) -> &KeySet {
        &self.inner.keys
    }

    pub fn config(&self) -> &WatchConfig {
        &self.inner.config
    }

    /// Consume an async stream on a background task.
    ///
    /// The task ends at end of stream or on the first read error; the join
    /// handle yields the number of records consumed. Must be called from
    /// within a tokio runtime.
    pub fn attach<R>(&self, source: R) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.attach_named("stream", source)
    }

    /// [`LogWatcher::attach`] with a label used in log events.
    pub fn attach_named<R>(&self, label: impl Into<String>, source: R) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let label = label.into();
        tokio::spawn(async move {
            let mut reader = BufReader::new(source);
            let mut record = Vec::with_capacity(256);
            let mut consumed: u64 = 0;
            loop {
                record.clear();
                let read = reader.read_until(b'\n', &mut record).await;
                if !inner.absorb(&label, read, &record, &mut consumed) {
                    break;
                }
            }
            debug!(source = %label, records = consumed, "Watched stream ended");
            consumed
        })
    }

    /// Consume a blocking reader (e.g. `std::process::ChildStdout`) on a
    /// dedicated thread.
    pub fn attach_blocking<R>(
        &self,
        label: impl Into<String>,
        source: R,
    ) -> std::io::Result<std::thread::JoinHandle<u64>>
    where
        R: std::io::Read + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let label = label.into();
        std::thread::Builder::new()
            .name(format!("agentwatch-{label}"))
            .spawn(move || {
                let mut reader = std::io::BufReader::new(source);
                let mut record = Vec::with_capacity(256);
                let mut consumed: u64 = 0;
                loop {
                    record.clear();
                    let read = reader.read_until(b'\n', &mut record);
                    if !inner.absorb(&label, read, &record, &mut consumed) {
                        break;
                    }
                }
                debug!(source = %label, records = consumed, "Watched stream ended");
                consumed
            })
    }

    /// Attach the piped stdout and stderr of a child process.
    ///
    /// Streams that were not piped (or were already taken) are skipped.
    pub fn attach_child(&self, child: &mut tokio::process::Child) -> Vec<JoinHandle<u64>> {
        let mut handles = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            handles.push(self.attach_named("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            handles.push(self.attach_named("stderr", stderr));
        }
        handles
    }

    /// Feed one record directly, as if a stream had produced it.
    pub fn observe(&self, record: impl AsRef<[u8]>) {
        self.inner.consume("direct", record.as_ref());
    }

    /// Whether `key` has been seen. Never blocks; unknown keys are false.
    pub fn key_occurred(&self, key: &str) -> bool {
        self.inner.keys.is_seen(key)
    }

    /// Records consumed so far across all attached sources.
    pub fn records_seen(&self) -> u64 {
        self.inner.records.load(Ordering::Relaxed)
    }

    /// Most recent records, oldest first.
    pub fn recent_lines(&self) -> Vec<String> {
        let tail = self.inner.tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<KeyState> {
        self.inner.keys.snapshot()
    }

    pub fn missing_keys(&self) -> Vec<String> {
        self.inner.keys.missing_keys()
    }

    /// Snapshot of flags and recent output.
    pub fn report(&self) -> WatchReport {
        WatchReport {
            keys: self.snapshot(),
            records_seen: self.records_seen(),
            recent_lines: self.recent_lines(),
        }
    }

    /// Wait until every key in `keys` has been seen.
    ///
    /// A key that is not watched can never be seen, so such a wait runs to
    /// its deadline. An empty request succeeds immediately. Flags are left
    /// as they are on failure; the error lists the keys still missing.
    pub async fn wait_for_keys<K: AsRef<str>>(
        &self,
        keys: &[K],
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> WatchResult<()> {
        let result = eventually(
            || self.inner.keys.all_seen_of(keys),
            timeout,
            poll_interval,
            cancel,
        )
        .await;
        let held = self.inner.keys.all_seen_of(keys);
        wait_result(result.outcome, held, timeout, self.inner.keys.missing_of(keys))
    }

    /// Wait until at least one key in `keys` has been seen.
    pub async fn wait_for_any_key<K: AsRef<str>>(
        &self,
        keys: &[K],
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> WatchResult<()> {
        let result = eventually(
            || self.inner.keys.any_seen_of(keys),
            timeout,
            poll_interval,
            cancel,
        )
        .await;
        let held = self.inner.keys.any_seen_of(keys);
        wait_result(result.outcome, held, timeout, self.inner.keys.missing_of(keys))
    }

    /// [`LogWatcher::wait_for_keys`] using the configured timeout and interval.
    pub async fn wait_for_keys_default<K: AsRef<str>>(
        &self,
        keys: &[K],
        cancel: &CancellationToken,
    ) -> WatchResult<()> {
        let config = &self.inner.config;
        self.wait_for_keys(keys, config.wait_timeout, config.poll_interval, cancel)
            .await
    }
}

/// `held` is the condition re-read after polling stopped. A key can land
/// between the last evaluation and the deadline check; such a wait succeeded.
fn wait_result(
    outcome: Outcome,
    held: bool,
    timeout: Duration,
    missing: Vec<String>,
) -> WatchResult<()> {
    match outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::TimedOut if held => Ok(()),
        Outcome::TimedOut => Err(WatchError::DeadlineExceeded { timeout, missing }),
        Outcome::Cancelled => Err(WatchError::Cancelled { missing }),
    }
}
