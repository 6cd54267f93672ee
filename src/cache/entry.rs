//! Cache Entry Module
//!
//! Defines the stored record shared by every backend: the caller's
//! value serialized once at write time, plus expiry metadata.

use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

// == Cache Entry ==
/// A single cache record with payload and expiry metadata.
///
/// The payload is encoded exactly once, when the entry is created;
/// reads hand the stored JSON back for decoding into the caller's
/// type. Backends persist the whole envelope as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller value, serialized at write time
    pub payload: Box<RawValue>,
    /// Write timestamp (Unix milliseconds)
    pub written_at: i64,
    /// Time-to-live in milliseconds, 0 = never expires
    pub ttl_ms: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry by serializing `value` and stamping the
    /// current time. A zero `ttl` means the entry never expires.
    pub fn new<T: Serialize + ?Sized>(value: &T, ttl: Duration) -> serde_json::Result<Self> {
        Ok(Self {
            payload: serde_json::value::to_raw_value(value)?,
            written_at: Utc::now().timestamp_millis(),
            ttl_ms: ttl.as_millis() as u64,
        })
    }

    // == Decode ==
    /// Decodes the stored payload into the requested type.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.payload.get())
    }

    // == Is Expired ==
    /// Checks whether the TTL has fully elapsed.
    ///
    /// An entry is expired once its age strictly exceeds the TTL;
    /// entries with a zero TTL never expire.
    pub fn is_expired(&self) -> bool {
        if self.ttl_ms == 0 {
            return false;
        }
        let age = Utc::now().timestamp_millis().saturating_sub(self.written_at);
        age > self.ttl_ms as i64
    }
}
