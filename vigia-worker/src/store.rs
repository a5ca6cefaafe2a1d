//! The worker's versioned response store.
//!
//! Stored responses live in a [`KeyValueStore`] under version-tagged keys
//! (`v{N}|{url}`), so activating a new worker version can purge every
//! entry written by older versions without touching its own. The page
//! never reaches this store directly; all access goes through the worker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use vigia_cache::KeyValueStore;
use vigia_core::{TierError, WorkerError};

/// Separator between the version tag and the URL in store keys.
const VERSION_SEPARATOR: char = '|';

/// One cached network response with its `cached-at` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
            cached_at: Utc::now(),
        }
    }

    /// Whether the `cached-at` marker shows this response older than `ttl`.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if ttl.is_zero() {
            return true;
        }
        match (now - self.cached_at).to_std() {
            Ok(age) => age > ttl,
            // cached in the future (clock skew), treat as fresh
            Err(_) => false,
        }
    }
}

fn store_err(e: TierError) -> WorkerError {
    WorkerError::Store {
        reason: e.to_string(),
    }
}

/// Response store bound to one worker version.
pub struct ResponseStore {
    kv: Arc<dyn KeyValueStore>,
    version: u32,
}

impl ResponseStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, version: u32) -> Self {
        Self { kv, version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    fn key(&self, url: &str) -> String {
        format!("v{}{}{}", self.version, VERSION_SEPARATOR, url)
    }

    /// Split a raw store key into its version tag and URL, if well-formed.
    fn split_key(raw: &str) -> Option<(&str, &str)> {
        let (tag, url) = raw.split_once(VERSION_SEPARATOR)?;
        tag.strip_prefix('v')?;
        Some((tag, url))
    }

    pub fn get(&self, url: &str) -> Result<Option<StoredResponse>, WorkerError> {
        let raw = match self.kv.get(&self.key(url)).map_err(store_err)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let response = serde_json::from_str(&raw).map_err(|e| WorkerError::Store {
            reason: format!("malformed stored response for {url}: {e}"),
        })?;
        Ok(Some(response))
    }

    pub fn put(&self, url: &str, response: &StoredResponse) -> Result<(), WorkerError> {
        let raw = serde_json::to_string(response).map_err(|e| WorkerError::Store {
            reason: e.to_string(),
        })?;
        self.kv.set(&self.key(url), &raw).map_err(store_err)
    }

    pub fn remove(&self, url: &str) -> Result<(), WorkerError> {
        self.kv.remove(&self.key(url)).map_err(store_err)
    }

    /// URLs stored under the current version.
    pub fn urls(&self) -> Result<Vec<String>, WorkerError> {
        let tag = format!("v{}", self.version);
        let urls = self
            .kv
            .keys()
            .map_err(store_err)?
            .into_iter()
            .filter_map(|raw| {
                Self::split_key(&raw)
                    .filter(|(version, _)| *version == tag)
                    .map(|(_, url)| url.to_string())
            })
            .collect();
        Ok(urls)
    }

    /// Delete every entry written by a version other than the current one.
    /// Returns the number of entries removed.
    pub fn purge_stale_versions(&self) -> Result<u64, WorkerError> {
        let tag = format!("v{}", self.version);
        let mut removed = 0u64;
        for raw in self.kv.keys().map_err(store_err)? {
            let stale = match Self::split_key(&raw) {
                Some((version, _)) => version != tag,
                // unrecognized key shape, not ours to keep
                None => true,
            };
            if stale {
                self.kv.remove(&raw).map_err(store_err)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every current-version entry whose URL contains `pattern`.
    /// Returns the number of entries removed.
    pub fn purge_pattern(&self, pattern: &str) -> Result<u64, WorkerError> {
        let mut removed = 0u64;
        for url in self.urls()? {
            if url.contains(pattern) {
                self.remove(&url)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
