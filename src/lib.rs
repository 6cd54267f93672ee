//! Caching subsystem for the virtui cluster client
//!
//! Reduces load on the remote cluster management API and persists
//! state across restarts. Two backends satisfy one uniform contract:
//! [`BoundedCache`], an in-process LRU cache with TTL expiry and
//! optional file mirroring, and [`DurableCache`], backed by an
//! embedded RocksDB engine with stale-lock recovery and periodic
//! compaction. [`CacheRegistry`] hands out one process-wide cache plus
//! isolated per-consumer namespaces, degrading to in-memory caching
//! whenever persistence is unavailable.

pub mod cache;
pub mod config;
pub mod error;
pub mod registry;

pub use cache::{
    BoundedCache, Cache, CacheEntry, CacheExt, CacheStats, DurableCache, SharedCache,
};
pub use config::CacheSettings;
pub use error::{CacheError, Result};
pub use registry::CacheRegistry;
