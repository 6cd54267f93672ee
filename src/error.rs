//! Error types for the caching subsystem
//!
//! Provides unified error handling using thiserror.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for every cache backend.
///
/// A missing or expired key is not an error; lookups report those as
/// `Ok(None)`. Errors cover genuine I/O, engine, and codec failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("cache i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Embedded storage engine operation failed
    #[error("storage engine error: {0}")]
    Engine(#[from] rocksdb::Error),

    /// Value could not be serialized for storage
    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored payload could not be decoded into the requested type.
    /// Distinct from a miss: the entry exists but is unreadable.
    #[error("failed to decode payload for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;
