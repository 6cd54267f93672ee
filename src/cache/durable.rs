//! Durable Cache Module
//!
//! Cache backed by an embedded RocksDB engine. Each instance owns one
//! engine handle rooted under its directory, recovers stale pid lock
//! markers left behind by a crashed process, and runs a periodic
//! compaction thread until closed.
//!
//! Concurrency safety for reads and writes is delegated to the engine;
//! the only instance-level state that needs guarding is the shutdown
//! of the compaction thread, which is take-once and therefore
//! idempotent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info, warn};

use crate::cache::{
    ensure_dir, remove_file_if_present, Cache, CacheEntry, CacheMetrics, CacheStats,
    COMPACTION_INTERVAL, OPEN_RETRY_DELAY,
};
use crate::error::{CacheError, Result};

// == Layout Constants ==
/// Pid marker guarding the cache directory.
pub const LOCK_FILE: &str = "LOCK";

/// Subdirectory holding the engine's own files.
const ENGINE_SUBDIR: &str = "engine";

/// Blob files above this garbage fraction are rewritten.
const RECLAIM_THRESHOLD: f64 = 0.5;

// == Durable Cache ==
/// Cache persisted through an embedded transactional KV engine.
pub struct DurableCache {
    db: Arc<DB>,
    dir: PathBuf,
    stop: Mutex<Option<Sender<()>>>,
    compactor: Mutex<Option<JoinHandle<()>>>,
    metrics: CacheMetrics,
}

impl DurableCache {
    // == Open ==
    /// Opens (or creates) a durable cache rooted at `dir`.
    ///
    /// A stale pid marker left by a dead process is removed before the
    /// engine is opened. When the engine directory is held by another
    /// live process the open is retried once after a short delay; if
    /// it still fails the error is returned so the caller can fall
    /// back to a non-persistent cache.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        recover_stale_lock(&dir.join(LOCK_FILE));

        let engine_dir = dir.join(ENGINE_SUBDIR);
        ensure_dir(&engine_dir)?;

        let opts = engine_options();
        let db = match DB::open(&opts, &engine_dir) {
            Ok(db) => db,
            Err(first) if is_lock_contention(&first) => {
                warn!(dir = %dir.display(), error = %first, "engine directory held, retrying once");
                thread::sleep(OPEN_RETRY_DELAY);
                DB::open(&opts, &engine_dir)?
            }
            Err(err) => return Err(err.into()),
        };
        let db = Arc::new(db);

        write_lock_marker(&dir.join(LOCK_FILE))?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let compactor = spawn_compactor(Arc::clone(&db), stop_rx)
            .map_err(|source| CacheError::io(&dir, source))?;
        info!(dir = %dir.display(), "durable cache opened");

        Ok(Self {
            db,
            dir,
            stop: Mutex::new(Some(stop_tx)),
            compactor: Mutex::new(Some(compactor)),
            metrics: CacheMetrics::default(),
        })
    }
}

impl Cache for DurableCache {
    // == Lookup ==
    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.db.get(key.as_bytes())? else {
            self.metrics.record_miss();
            return Ok(None);
        };
        let entry: CacheEntry =
            serde_json::from_slice(&raw).map_err(|source| CacheError::Decode {
                key: key.to_string(),
                source,
            })?;
        if entry.is_expired() {
            // Lazy purge outside the read path; failure is tolerated.
            if let Err(err) = self.db.delete(key.as_bytes()) {
                debug!(key, error = %err, "failed to drop expired entry");
            }
            self.metrics.record_expiration();
            self.metrics.record_miss();
            return Ok(None);
        }
        self.metrics.record_hit();
        Ok(Some(entry))
    }

    // == Store ==
    fn store(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let raw = serde_json::to_vec(&entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.db.put(key.as_bytes(), raw)?;
        Ok(())
    }

    // == Remove ==
    fn remove(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    // == Clear ==
    fn clear(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    // == Close ==
    /// Stops the compaction thread and releases the directory marker.
    ///
    /// The stop channel is taken out under its lock, so a second call
    /// finds nothing to do and returns immediately.
    fn close(&self) -> Result<()> {
        let Some(stop) = self.stop.lock().take() else {
            return Ok(());
        };
        // Dropping the sender disconnects the channel; the compactor
        // observes that and exits its loop.
        drop(stop);
        if let Some(handle) = self.compactor.lock().take() {
            if handle.join().is_err() {
                warn!("compaction thread panicked during shutdown");
            }
        }
        remove_file_if_present(&self.dir.join(LOCK_FILE))?;
        debug!(dir = %self.dir.display(), "durable cache closed");
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        let total = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")
            .ok()
            .flatten()
            .unwrap_or(0) as usize;
        self.metrics.snapshot(total)
    }
}

impl Drop for DurableCache {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "error closing durable cache on drop");
        }
    }
}

// == Engine Tuning ==
/// Options tuned for many small values: quiet logging, small blob
/// segments, garbage collection once half a segment is reclaimable.
fn engine_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.set_log_level(rocksdb::LogLevel::Fatal);
    opts.set_keep_log_file_num(1);
    opts.set_enable_blob_files(true);
    opts.set_min_blob_size(256);
    opts.set_blob_file_size(8 * 1024 * 1024);
    opts.set_enable_blob_gc(true);
    opts.set_blob_gc_age_cutoff(RECLAIM_THRESHOLD);
    opts
}

/// The engine reports a held directory as an IO error naming its own
/// lock file.
fn is_lock_contention(err: &rocksdb::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("lock")
}

// == Stale Lock Recovery ==
/// Removes `marker` when the process named in it is gone or the file
/// is unreadable or malformed; a marker owned by a live process is
/// left in place.
///
/// Liveness is judged by signalling pid 0-style; on hosts that recycle
/// pids quickly an unrelated live process can make a dead owner's
/// marker look current. The engine's own lock still prevents actual
/// concurrent opens, so the cost is a spurious contention error.
fn recover_stale_lock(marker: &Path) {
    let raw = match fs::read_to_string(marker) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => {
            warn!(marker = %marker.display(), error = %err, "removing unreadable lock marker");
            let _ = fs::remove_file(marker);
            return;
        }
    };
    match raw.lines().next().and_then(|line| line.trim().parse::<u32>().ok()) {
        Some(pid) if process_alive(pid) => {
            debug!(pid, marker = %marker.display(), "lock marker owner is alive");
        }
        Some(pid) => {
            info!(pid, marker = %marker.display(), "removing stale lock marker of dead process");
            let _ = fs::remove_file(marker);
        }
        None => {
            warn!(marker = %marker.display(), "removing malformed lock marker");
            let _ = fs::remove_file(marker);
        }
    }
}

/// Records this process as the directory owner: pid plus a timestamp
/// for diagnostics.
fn write_lock_marker(marker: &Path) -> Result<()> {
    let contents = format!("{}\n{}\n", std::process::id(), Utc::now().to_rfc3339());
    fs::write(marker, contents).map_err(|source| CacheError::io(marker.to_path_buf(), source))
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Without a liveness probe every marker is treated as stale.
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

// == Compaction Task ==
/// Runs a space-reclamation pass on a fixed interval until the stop
/// channel fires or disconnects.
fn spawn_compactor(db: Arc<DB>, stop: Receiver<()>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cache-compactor".into())
        .spawn(move || loop {
            match stop.recv_timeout(COMPACTION_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {
                    debug!("running cache compaction pass");
                    db.compact_range(None::<&[u8]>, None::<&[u8]>);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use std::thread::sleep;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn get_unknown_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        let value: Option<String> = cache.get("missing").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.set("alpha", "hello", HOUR).unwrap();
        let value: Option<String> = cache.get("alpha").unwrap();

        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.set("temp", "x", Duration::from_millis(10)).unwrap();
        sleep(Duration::from_millis(25));

        let value: Option<String> = cache.get("temp").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.set("perm", "x", Duration::ZERO).unwrap();
        sleep(Duration::from_millis(100));

        let value: Option<String> = cache.get("perm").unwrap();
        assert_eq!(value.as_deref(), Some("x"));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let first = DurableCache::open(dir.path()).unwrap();
        first.set("p", "v", HOUR).unwrap();
        first.close().unwrap();
        drop(first);

        let second = DurableCache::open(dir.path()).unwrap();
        let value: Option<String> = second.get("p").unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        assert!(cache.remove("missing").is_ok());
    }

    #[test]
    fn clear_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.set("a", &1u32, HOUR).unwrap();
        cache.set("b", &2u32, HOUR).unwrap();
        cache.clear().unwrap();

        assert!(cache.get::<u32>("a").unwrap().is_none());
        assert!(cache.get::<u32>("b").unwrap().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.close().unwrap();
        cache.close().unwrap();
    }

    #[test]
    fn open_writes_pid_marker_and_close_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        let marker = dir.path().join(LOCK_FILE);
        let contents = fs::read_to_string(&marker).unwrap();
        assert!(contents.starts_with(&std::process::id().to_string()));

        cache.close().unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn stale_marker_of_dead_process_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        // Far above any real pid range, so the owner cannot exist.
        fs::write(dir.path().join(LOCK_FILE), "999999999\n").unwrap();

        let cache = DurableCache::open(dir.path()).unwrap();
        cache.set("k", "v", HOUR).unwrap();
        assert_eq!(cache.get::<String>("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn malformed_marker_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not a pid\n").unwrap();

        assert!(DurableCache::open(dir.path()).is_ok());
    }

    #[test]
    fn second_open_of_held_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _first = DurableCache::open(dir.path()).unwrap();

        let second = DurableCache::open(dir.path());
        assert!(second.is_err());
    }

    #[test]
    fn stats_track_lookup_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DurableCache::open(dir.path()).unwrap();

        cache.set("key", "v", HOUR).unwrap();
        cache.get::<String>("key").unwrap();
        cache.get::<String>("missing").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
