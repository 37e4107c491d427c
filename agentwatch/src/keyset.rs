//! Fixed set of watched substrings with monotonic "seen" flags.
//!
//! The set of keys is decided at construction. Afterwards only the flags
//! change, and only from unseen to seen. Flags are atomics so any number of
//! readers can sample them while a consumer is marking matches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use memchr::memmem::Finder;
use serde::{Deserialize, Serialize};

use crate::error::{WatchError, WatchResult};

/// Point-in-time state of one watched key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub key: String,
    pub seen: bool,
}

struct Target {
    key: String,
    finder: Finder<'static>,
    seen: AtomicBool,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("key", &self.key)
            .field("seen", &self.seen.load(Ordering::Acquire))
            .finish()
    }
}

/// Immutable collection of target substrings, each with its own flag.
#[derive(Debug)]
pub struct KeySet {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    seen_count: AtomicUsize,
}

impl KeySet {
    /// Build a key set with every flag unseen.
    ///
    /// Duplicates are dropped (first occurrence wins the ordering). An empty
    /// list, or an empty string among the targets, is rejected: an empty
    /// needle would match every record.
    pub fn new<I, S>(targets: I) -> WatchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<Target> = Vec::new();
        let mut index = HashMap::new();

        for key in targets {
            let key = key.into();
            if key.is_empty() {
                return Err(WatchError::InvalidTargetSet(
                    "target strings must not be empty".to_string(),
                ));
            }
            if index.contains_key(&key) {
                continue;
            }
            index.insert(key.clone(), keys.len());
            keys.push(Target {
                finder: Finder::new(key.as_bytes()).into_owned(),
                key,
                seen: AtomicBool::new(false),
            });
        }

        if keys.is_empty() {
            return Err(WatchError::InvalidTargetSet(
                "at least one target is required".to_string(),
            ));
        }

        Ok(Self {
            targets: keys,
            index,
            seen_count: AtomicUsize::new(0),
        })
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the set has no keys.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Keys in construction order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.key.as_str())
    }

    /// Whether `key` is one of the watched targets.
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Current flag for `key`. Unknown keys are never seen.
    pub fn is_seen(&self, key: &str) -> bool {
        self.index
            .get(key)
            .is_some_and(|&i| self.targets[i].seen.load(Ordering::Acquire))
    }

    /// Number of keys seen so far.
    pub fn seen_count(&self) -> usize {
        self.seen_count.load(Ordering::Acquire)
    }

    /// True once every key has been seen.
    pub fn all_seen(&self) -> bool {
        self.seen_count() == self.targets.len()
    }

    /// True once at least one key has been seen.
    pub fn any_seen(&self) -> bool {
        self.seen_count() > 0
    }

    /// True when every key in `keys` is seen. Keys outside the set count as
    /// unseen, so a request naming one never succeeds.
    pub fn all_seen_of<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        keys.iter().all(|k| self.is_seen(k.as_ref()))
    }

    /// True when at least one key in `keys` is seen.
    pub fn any_seen_of<K: AsRef<str>>(&self, keys: &[K]) -> bool {
        keys.iter().any(|k| self.is_seen(k.as_ref()))
    }

    /// Mark every unseen key contained in `haystack`.
    ///
    /// Returns how many keys flipped to seen because of this call. Keys that
    /// are substrings of one another are all marked by the same haystack.
    pub fn scan(&self, haystack: &[u8]) -> usize {
        self.scan_collect(haystack).len()
    }

    /// Same as [`KeySet::scan`], additionally returning the keys that flipped.
    pub(crate) fn scan_collect(&self, haystack: &[u8]) -> Vec<&str> {
        let mut flipped = Vec::new();
        if self.all_seen() {
            return flipped;
        }
        for target in &self.targets {
            if target.seen.load(Ordering::Acquire) {
                continue;
            }
            if target.finder.find(haystack).is_some() && self.mark(target) {
                flipped.push(target.key.as_str());
            }
        }
        flipped
    }

    // Returns true only for the caller that performed the false -> true flip.
    fn mark(&self, target: &Target) -> bool {
        if target.seen.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.seen_count.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Flag state of every key, in construction order.
    pub fn snapshot(&self) -> Vec<KeyState> {
        self.targets
            .iter()
            .map(|t| KeyState {
                key: t.key.clone(),
                seen: t.seen.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Keys not seen yet, in construction order.
    pub fn missing_keys(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| !t.seen.load(Ordering::Acquire))
            .map(|t| t.key.clone())
            .collect()
    }

    /// Keys from `keys` that are not seen yet, preserving the caller's order.
    pub fn missing_of<K: AsRef<str>>(&self, keys: &[K]) -> Vec<String> {
        keys.iter()
            .map(AsRef::as_ref)
            .filter(|k| !self.is_seen(k))
            .map(str::to_string)
            .collect()
    }
}
