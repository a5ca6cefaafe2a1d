//! Cache entry primitives.
//!
//! One entry per derived key. The memory tier keeps typed [`MemoryEntry`]
//! values; serialized tiers store a [`StoredEnvelope`] rendered to a JSON
//! string. Expiry is the single invariant both share: an entry is expired
//! iff its age exceeds the TTL it was written with, and a zero TTL marks it
//! never valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vigia_core::TierError;

/// Expiry predicate shared by every tier.
pub fn is_expired(stored_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    if ttl.is_zero() {
        return true;
    }
    let age = now.signed_duration_since(stored_at);
    match age.to_std() {
        Ok(age) => age > ttl,
        // stored_at in the future (clock skew): treat as fresh
        Err(_) => false,
    }
}

/// A typed entry held in the memory tier (or the overlay of a serialized
/// tier after a write fallback).
#[derive(Debug, Clone)]
pub struct MemoryEntry<T> {
    /// The cached value
    pub value: T,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// TTL assigned at write time
    pub ttl: Duration,
}

impl<T> MemoryEntry<T> {
    /// Create an entry written now.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// Whether the entry has outlived its TTL as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.stored_at, self.ttl, now)
    }
}

/// The serialized form written to session/local tiers.
///
/// Encodes `{data, timestamp}`; the TTL is not stored because it belongs to
/// the engine instance, not the entry, and may differ between instances
/// sharing a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// JSON rendering of the cached value
    pub data: serde_json::Value,
    /// Milliseconds since epoch at write time
    pub timestamp: i64,
}

impl StoredEnvelope {
    /// Wrap a serializable value, stamped now.
    pub fn wrap<T: Serialize>(value: &T) -> Result<Self, TierError> {
        let data = serde_json::to_value(value).map_err(|e| TierError::Serialization {
            reason: e.to_string(),
        })?;
        Ok(Self {
            data,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Encode to the string stored in the tier.
    pub fn encode(&self) -> Result<String, TierError> {
        serde_json::to_string(self).map_err(|e| TierError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Decode a stored string. A malformed value is a [`TierError`] that
    /// the engine downgrades to a cache miss.
    pub fn decode(key: &str, raw: &str) -> Result<Self, TierError> {
        serde_json::from_str(raw).map_err(|e| TierError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// When the envelope was written.
    pub fn stored_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }

    /// Deserialize the payload into its typed form.
    pub fn unwrap_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, TierError> {
        serde_json::from_value(self.data.clone()).map_err(|e| TierError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
