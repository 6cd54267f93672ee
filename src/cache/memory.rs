//! Bounded Cache Module
//!
//! In-process cache combining a hash index with LRU recency tracking,
//! with an optional write-through mode mirroring each entry to a JSON
//! file on disk.
//!
//! All state sits behind one mutex. Lookups promote the touched key in
//! the recency order, so there is no read-only path; file operations
//! for a persisted instance happen under the same lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{
    ensure_dir, remove_file_if_present, Cache, CacheEntry, CacheMetrics, CacheStats, LruTracker,
};
use crate::error::{CacheError, Result};

// == Bounded Cache ==
/// LRU cache with TTL expiry and optional per-entry file persistence.
pub struct BoundedCache {
    inner: Mutex<Inner>,
    metrics: CacheMetrics,
    /// Maximum entry count; 0 = unbounded
    capacity: usize,
    /// Mirror directory for write-through persistence
    dir: Option<PathBuf>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
}

impl BoundedCache {
    // == Constructors ==
    /// Creates an ephemeral cache holding at most `capacity` entries.
    /// A capacity of zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            metrics: CacheMetrics::default(),
            capacity,
            dir: None,
        }
    }

    /// Creates a cache mirrored to one JSON file per entry under
    /// `dir`, hydrating entries already on disk.
    ///
    /// Files that do not parse as entries are skipped; entries found
    /// expired are dropped along with their file. Recency order does
    /// not survive a restart, so hydrated entries start in arbitrary
    /// order.
    ///
    /// # Arguments
    /// * `dir` - Mirror directory, created if missing
    /// * `capacity` - Maximum entry count, 0 = unbounded
    pub fn persisted(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let inner = hydrate(&dir)?;
        debug!(
            entries = inner.entries.len(),
            dir = %dir.display(),
            "hydrated persisted cache"
        );
        Ok(Self {
            inner: Mutex::new(inner),
            metrics: CacheMetrics::default(),
            capacity,
            dir: Some(dir),
        })
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Cache for BoundedCache {
    // == Lookup ==
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(key).map(|e| (e.is_expired(), e.clone()));
        match found {
            None => {
                self.metrics.record_miss();
                Ok(None)
            }
            Some((true, _)) => {
                inner.entries.remove(key);
                inner.lru.forget(key);
                if let Some(dir) = &self.dir {
                    // Purging an expired entry is best-effort.
                    if let Err(err) = remove_file_if_present(&entry_file(dir, key)) {
                        debug!(key, error = %err, "failed to drop expired entry file");
                    }
                }
                self.metrics.record_expiration();
                self.metrics.record_miss();
                Ok(None)
            }
            Some((false, entry)) => {
                inner.lru.promote(key);
                self.metrics.record_hit();
                Ok(Some(entry))
            }
        }
    }

    // == Store ==
    /// Inserts or replaces the entry for `key`, promoting it to most
    /// recently used and evicting the LRU entry when over capacity.
    ///
    /// For persisted instances the memory mutation happens first; a
    /// failed file write leaves memory ahead of disk until the next
    /// successful write for that key.
    fn store(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        let existed = inner.entries.insert(key.to_string(), entry.clone()).is_some();
        inner.lru.promote(key);

        let mut evicted = None;
        if !existed && self.capacity > 0 && inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.lru.pop_lru() {
                inner.entries.remove(&oldest);
                self.metrics.record_eviction();
                evicted = Some(oldest);
            }
        }

        if let Some(dir) = &self.dir {
            if let Some(oldest) = evicted {
                remove_file_if_present(&entry_file(dir, &oldest))?;
            }
            let path = entry_file(dir, key);
            let raw = serde_json::to_vec(&entry).map_err(|source| CacheError::Encode {
                key: key.to_string(),
                source,
            })?;
            fs::write(&path, raw).map_err(|source| CacheError::io(path, source))?;
        }
        Ok(())
    }

    // == Remove ==
    fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_some() {
            inner.lru.forget(key);
        }
        if let Some(dir) = &self.dir {
            remove_file_if_present(&entry_file(dir, key))?;
        }
        Ok(())
    }

    // == Clear ==
    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
        if let Some(dir) = &self.dir {
            for dirent in fs::read_dir(dir).map_err(|source| CacheError::io(dir, source))? {
                let path = dirent.map_err(|source| CacheError::io(dir, source))?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    remove_file_if_present(&path)?;
                }
            }
        }
        Ok(())
    }

    // == Close ==
    /// The bounded cache holds no handles; closing is a no-op.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.inner.lock().entries.len())
    }
}

// == File Layout ==
/// Path of the mirror file for `key`: `<dir>/<urlsafe-key>.json`.
fn entry_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", urlencoding::encode(key)))
}

/// Rebuilds the index from every entry file under `dir`.
fn hydrate(dir: &Path) -> Result<Inner> {
    let mut inner = Inner::default();
    for dirent in fs::read_dir(dir).map_err(|source| CacheError::io(dir, source))? {
        let path = dirent.map_err(|source| CacheError::io(dir, source))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(key) = urlencoding::decode(stem) else {
            continue;
        };
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable cache file");
                continue;
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(_) => {
                debug!(path = %path.display(), "skipping non-entry file");
                continue;
            }
        };
        if entry.is_expired() {
            if let Err(err) = remove_file_if_present(&path) {
                warn!(path = %path.display(), error = %err, "failed to drop expired entry file");
            }
            continue;
        }
        inner.lru.promote(&key);
        inner.entries.insert(key.into_owned(), entry);
    }
    Ok(inner)
}
