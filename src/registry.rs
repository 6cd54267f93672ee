//! Cache Registry Module
//!
//! An explicit registry handle constructed once at process start and
//! passed to every consumer. Hands out one process-wide cache plus
//! isolated namespace caches created on first request, degrading to
//! ephemeral in-memory caches whenever the durable path cannot be
//! initialized. The process must stay usable with no persistence at
//! all.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::cache::{
    BoundedCache, CacheExt, DurableCache, SharedCache, LOCK_FILE, OPEN_RETRY_DELAY,
};
use crate::config::CacheSettings;
use crate::error::CacheError;

/// Directory under the root holding namespace caches.
const NAMESPACE_SUBDIR: &str = "ns";

/// Throwaway key for the post-open round-trip probe.
const SELF_TEST_KEY: &str = "__startup_probe__";

// == Cache Registry ==
/// Lazily constructs and owns the process's cache instances.
pub struct CacheRegistry {
    settings: CacheSettings,
    global: OnceLock<SharedCache>,
    namespaces: RwLock<HashMap<String, SharedCache>>,
}

impl CacheRegistry {
    // == Constructor ==
    /// Creates a registry rooted at `settings.root`. No I/O happens
    /// until the first cache is requested.
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            global: OnceLock::new(),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    // == Global Cache ==
    /// Returns the process-wide cache, initializing it on first call.
    ///
    /// When the durable backend cannot be opened the registry degrades
    /// to an ephemeral in-memory cache instead of failing startup. The
    /// cause is handed back only to the call that performed the
    /// initialization, so it gets reported exactly once.
    pub fn global(&self) -> (SharedCache, Option<CacheError>) {
        let mut init_err = None;
        let cache = self
            .global
            .get_or_init(|| {
                let (cache, err) = self.open_global();
                init_err = err;
                cache
            })
            .clone();
        (cache, init_err)
    }

    fn open_global(&self) -> (SharedCache, Option<CacheError>) {
        let root = &self.settings.root;
        let opened = match DurableCache::open(root) {
            Err(err) if root.join(LOCK_FILE).exists() => {
                // A marker was observed: give a dying owner a moment to
                // let go, then try once more before degrading.
                warn!(root = %root.display(), error = %err, "global cache open contended, retrying");
                thread::sleep(OPEN_RETRY_DELAY);
                DurableCache::open(root)
            }
            other => other,
        };
        match opened {
            Ok(cache) => {
                let cache: SharedCache = Arc::new(cache);
                self.self_test(&cache);
                info!(root = %root.display(), "global cache initialized");
                (cache, None)
            }
            Err(err) => {
                warn!(root = %root.display(), error = %err, "durable cache unavailable, degrading to in-memory");
                (Arc::new(BoundedCache::new(self.settings.capacity)), Some(err))
            }
        }
    }

    /// Round-trip probe on a freshly opened cache; inconsistencies are
    /// reported, never fatal.
    fn self_test(&self, cache: &SharedCache) {
        let ok = cache
            .set(SELF_TEST_KEY, "ok", Duration::from_secs(60))
            .is_ok()
            && matches!(cache.get::<String>(SELF_TEST_KEY), Ok(Some(v)) if v == "ok")
            && cache.remove(SELF_TEST_KEY).is_ok();
        if !ok {
            warn!("global cache failed its startup round-trip probe");
        }
    }

    // == Namespaced Caches ==
    /// Returns the isolated cache for `name`, creating it on first
    /// request.
    ///
    /// Namespaces are independent key spaces: each gets its own
    /// durable cache under the registry root, or an ephemeral
    /// in-memory cache when the durable path fails.
    pub fn namespaced(&self, name: &str) -> SharedCache {
        if let Some(cache) = self.namespaces.read().get(name) {
            return cache.clone();
        }
        let mut namespaces = self.namespaces.write();
        // Re-check: another thread may have won the construction race
        // between our read and write locks.
        if let Some(cache) = namespaces.get(name) {
            return cache.clone();
        }
        let dir = self
            .settings
            .root
            .join(NAMESPACE_SUBDIR)
            .join(urlencoding::encode(name).as_ref());
        let cache: SharedCache = match DurableCache::open(&dir) {
            Ok(cache) => Arc::new(cache),
            Err(err) => {
                warn!(namespace = name, error = %err, "namespace cache degraded to in-memory");
                Arc::new(BoundedCache::new(self.settings.capacity))
            }
        };
        namespaces.insert(name.to_string(), cache.clone());
        cache
    }

    // == Teardown ==
    /// Closes every cache this registry has handed out. The first
    /// failure is returned after all closes have been attempted.
    pub fn close_all(&self) -> crate::error::Result<()> {
        let mut first_err = None;
        if let Some(cache) = self.global.get() {
            if let Err(err) = cache.close() {
                warn!(error = %err, "failed to close global cache");
                first_err.get_or_insert(err);
            }
        }
        for (name, cache) in self.namespaces.read().iter() {
            if let Err(err) = cache.close() {
                warn!(namespace = %name, error = %err, "failed to close namespace cache");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
