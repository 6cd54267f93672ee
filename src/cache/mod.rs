//! Cache Module
//!
//! One uniform contract over two backends: [`BoundedCache`], an
//! in-process LRU cache with TTL expiry and optional per-entry file
//! mirroring, and [`DurableCache`], backed by an embedded RocksDB
//! engine. Callers hold a [`SharedCache`] and never know which backend
//! serves them.

mod durable;
mod entry;
mod lru;
mod memory;
mod stats;


// Re-export public types
pub use durable::DurableCache;
pub(crate) use durable::LOCK_FILE;
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::BoundedCache;
pub use stats::{CacheMetrics, CacheStats};

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Entry bound used for ephemeral and degraded caches
pub const DEFAULT_CAPACITY: usize = 1000;

/// Interval between space-reclamation passes on the durable backend
pub const COMPACTION_INTERVAL: Duration = Duration::from_secs(300);

/// Delay before the single retry when the engine directory is held
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Shared handle to any cache backend.
pub type SharedCache = Arc<dyn Cache>;

// == Cache Contract ==
/// Uniform, object-safe contract satisfied by every backend.
///
/// The raw plane moves whole [`CacheEntry`] envelopes; typed access
/// lives in [`CacheExt`] so trait objects stay usable. Absent and
/// expired keys are misses (`Ok(None)`), never errors.
pub trait Cache: Send + Sync {
    /// Looks up a live entry, promoting it on recency-tracking
    /// backends. Expired entries are purged best-effort and reported
    /// as misses.
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores an entry, overwriting any previous value for the key.
    fn store(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Removes an entry. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Drops every entry, including on-disk artifacts.
    fn clear(&self) -> Result<()>;

    /// Releases backend resources (files, engine handle, background
    /// work). Safe to call more than once; later calls are no-ops.
    fn close(&self) -> Result<()>;

    /// Point-in-time performance counters for this instance.
    fn stats(&self) -> CacheStats;
}

// == Typed Access ==
/// Typed get/set over any [`Cache`].
pub trait CacheExt: Cache {
    /// Retrieves and decodes the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent or expired. A payload
    /// that exists but cannot be decoded into `T` is an error, not a
    /// miss, so callers can tell "nothing there" from "unreadable".
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.lookup(key)? {
            Some(entry) => entry.decode().map(Some).map_err(|source| CacheError::Decode {
                key: key.to_string(),
                source,
            }),
            None => Ok(None),
        }
    }

    /// Serializes `value` once and stores it under `key`.
    ///
    /// A zero `ttl` means the entry never expires.
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value, ttl).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store(key, entry)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

// == Filesystem Helpers ==
/// Creates `dir` and any missing parents, owner-only on Unix.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(|source| CacheError::io(dir, source))
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_file_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::io(path.to_path_buf(), source)),
    }
}
