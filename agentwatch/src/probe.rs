//! Predicate helpers for state outside the watched streams.
//!
//! These return `io::Result` so they compose with
//! [`crate::eventually_ok`]: a file that does not exist yet is simply "not
//! ready".

use std::io;
use std::path::Path;

use crate::keyset::KeySet;

/// Read `path` and mark every unseen key it contains.
///
/// Returns how many keys flipped to seen. An empty file flips nothing.
pub fn scan_file(path: &Path, keys: &KeySet) -> io::Result<usize> {
    let content = std::fs::read(path)?;
    Ok(keys.scan(&content))
}

/// Async form of [`scan_file`].
pub async fn scan_file_async(path: &Path, keys: &KeySet) -> io::Result<usize> {
    let content = tokio::fs::read(path).await?;
    Ok(keys.scan(&content))
}
