//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The storage tier an engine instance is bound to.
///
/// Exactly one tier per instance. Memory entries do not survive a restart;
/// session entries live as long as the session store; local entries persist
/// until explicitly cleared or expired and pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process typed map, no serialization
    Memory,
    /// Session-scoped string store
    Session,
    /// Persisted string store
    Local,
}

impl CacheTier {
    /// Stable lowercase name, used in stats snapshots and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Session => "session",
            Self::Local => "local",
        }
    }
}

impl Default for CacheTier {
    fn default() -> Self {
        Self::Memory
    }
}

/// Per-instance cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    /// Time-to-live assigned to entries at write time. A zero TTL marks the
    /// instance always-fresh: nothing it writes is ever considered valid.
    pub ttl: Duration,
    /// Which tier this instance stores entries in.
    pub tier: CacheTier,
    /// Serve expired entries immediately while refreshing in the background.
    pub stale_while_revalidate: bool,
    /// Values folded into the key basis; changing any of them changes every
    /// derived key, implicitly invalidating the previous generation.
    pub depends_on: Vec<serde_json::Value>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            tier: CacheTier::Memory,
            stale_while_revalidate: false,
            depends_on: Vec::new(),
        }
    }
}

impl CacheOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the storage tier.
    pub fn with_tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }

    /// Enable or disable stale-while-revalidate.
    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// Add a dependency value to the key basis.
    pub fn depends_on(mut self, value: serde_json::Value) -> Self {
        self.depends_on.push(value);
        self
    }
}
