//! Configuration Module
//!
//! Cache tuning loaded from environment variables with sensible
//! defaults.

use std::env;
use std::path::PathBuf;

use crate::cache::DEFAULT_CAPACITY;

/// Tuning for the caching subsystem.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Directory holding the durable caches
    pub root: PathBuf,
    /// Entry bound for ephemeral and degraded caches
    pub capacity: usize,
}

impl CacheSettings {
    /// Creates settings by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `VIRTUI_CACHE_DIR` - Cache root (default: platform cache dir)
    /// - `VIRTUI_CACHE_CAPACITY` - In-memory entry bound (default: 1000)
    pub fn from_env() -> Self {
        Self {
            root: env::var("VIRTUI_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_root()),
            capacity: env::var("VIRTUI_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CAPACITY),
        }
    }

    /// Settings rooted at an explicit directory, defaults elsewhere.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("virtui")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = CacheSettings::default();
        assert_eq!(settings.capacity, DEFAULT_CAPACITY);
        assert!(settings.root.ends_with("virtui"));
    }

    #[test]
    fn rooted_overrides_directory_only() {
        let settings = CacheSettings::rooted("/tmp/elsewhere");
        assert_eq!(settings.root, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(settings.capacity, DEFAULT_CAPACITY);
    }
}
