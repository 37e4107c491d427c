//! Log watching and eventual-condition polling for agent integration tests.
//!
//! Two primitives:
//! - [`LogWatcher`] tails process output and records the first occurrence of
//!   each watched substring in a [`KeySet`].
//! - [`eventually`] (and its async / fallible variants) re-evaluates a
//!   predicate at a fixed interval until it holds, a timeout elapses, or a
//!   [`CancellationToken`] fires.
//!
//! Starting the process under test, writing its configuration and querying
//! whatever backend it feeds are left to the caller.

pub mod config;
pub mod error;
pub mod eventually;
pub mod keyset;
pub mod probe;
pub mod testing;
pub mod watcher;

pub use config::{EnvError, EnvParser, WatchConfig};
pub use error::{WatchError, WatchResult};
pub use eventually::{EventuallyResult, Outcome, eventually, eventually_async, eventually_ok};
pub use keyset::{KeySet, KeyState};
pub use probe::{scan_file, scan_file_async};
pub use watcher::{LogWatcher, WatchReport};

pub use tokio_util::sync::CancellationToken;
