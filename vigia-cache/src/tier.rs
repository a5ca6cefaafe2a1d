//! Key/value store abstraction for the serialized tiers.
//!
//! Session and local tiers are string key/value stores with the contract of
//! the runtime-provided storage primitives: synchronous `get`/`set`/
//! `remove`/`clear` plus `keys` enumeration for prefix and pattern scans.
//! The memory tier does not go through this trait; it is a typed in-process
//! map owned by each engine instance.

use std::collections::HashMap;
use std::sync::RwLock;
use vigia_core::TierError;

/// String key/value store backing a serialized tier.
///
/// Implementations must be thread-safe. Every method is synchronous within
/// its context; write failures (quota and the like) are reported as errors
/// and recovered by the engine, never panics.
pub trait KeyValueStore: Send + Sync {
    /// Get the stored value for a key.
    fn get(&self, key: &str) -> Result<Option<String>, TierError>;

    /// Store a value under a key, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), TierError>;

    /// Remove a key. Absent keys are a no-op.
    fn remove(&self, key: &str) -> Result<(), TierError>;

    /// Remove every key.
    fn clear(&self) -> Result<(), TierError>;

    /// Enumerate every stored key.
    fn keys(&self) -> Result<Vec<String>, TierError>;
}

/// Delete every key containing `pattern`, returning the number removed.
///
/// Substring containment, not prefix or regex: broader eviction is the
/// accepted trade-off against serving stale data.
pub fn purge_pattern(store: &dyn KeyValueStore, pattern: &str) -> Result<u64, TierError> {
    let mut removed = 0u64;
    for key in store.keys()? {
        if key.contains(pattern) {
            store.remove(&key)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Delete every key starting with `prefix`, returning the number removed.
pub fn purge_prefix(store: &dyn KeyValueStore, prefix: &str) -> Result<u64, TierError> {
    let mut removed = 0u64;
    for key in store.keys()? {
        if key.starts_with(prefix) {
            store.remove(&key)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// In-process key/value store.
///
/// Serves as the session tier (alive as long as the process) and as the
/// store for tests that need to observe or corrupt raw tier contents.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// True when the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, TierError> {
        let entries = self.entries.read().map_err(|_| TierError::ReadFailed {
            key: key.to_string(),
            reason: "lock poisoned".into(),
        })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TierError> {
        let mut entries = self.entries.write().map_err(|_| TierError::WriteFailed {
            key: key.to_string(),
            reason: "lock poisoned".into(),
        })?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TierError> {
        let mut entries = self.entries.write().map_err(|_| TierError::WriteFailed {
            key: key.to_string(),
            reason: "lock poisoned".into(),
        })?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), TierError> {
        let mut entries = self.entries.write().map_err(|_| TierError::WriteFailed {
            key: String::new(),
            reason: "lock poisoned".into(),
        })?;
        entries.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, TierError> {
        let entries = self.entries.read().map_err(|_| TierError::ReadFailed {
            key: String::new(),
            reason: "lock poisoned".into(),
        })?;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = InMemoryKvStore::new();
        store.set("a", "1").expect("set should succeed");
        assert_eq!(store.get("a").expect("get should succeed"), Some("1".into()));

        store.remove("a").expect("remove should succeed");
        assert_eq!(store.get("a").expect("get should succeed"), None);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = InMemoryKvStore::new();
        store.remove("missing").expect("remove should succeed");
    }

    #[test]
    fn test_clear() {
        let store = InMemoryKvStore::new();
        store.set("a", "1").expect("set should succeed");
        store.set("b", "2").expect("set should succeed");
        store.clear().expect("clear should succeed");
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_pattern_substring() {
        let store = InMemoryKvStore::new();
        store
            .set("compliance_20-12345678-9", "a")
            .expect("set should succeed");
        store
            .set("compliance_dashboard", "b")
            .expect("set should succeed");
        store
            .set("contributor_20-12345678-9", "c")
            .expect("set should succeed");

        let removed = purge_pattern(&store, "compliance_").expect("purge should succeed");
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store
            .get("contributor_20-12345678-9")
            .expect("get should succeed")
            .is_some());
    }

    #[test]
    fn test_purge_prefix_is_anchored() {
        let store = InMemoryKvStore::new();
        store.set("alerts_open", "a").expect("set should succeed");
        store
            .set("dashboard_alerts_open", "b")
            .expect("set should succeed");

        let removed = purge_prefix(&store, "alerts").expect("purge should succeed");
        assert_eq!(removed, 1);
        assert!(store
            .get("dashboard_alerts_open")
            .expect("get should succeed")
            .is_some());
    }
}
