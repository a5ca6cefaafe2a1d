//! LMDB-backed key/value store for the local (persisted) tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) so locally-tiered entries
//! survive restarts. Keys and values are strings; the engine stores
//! [`StoredEnvelope`] JSON in here exactly as it would in any other
//! serialized tier.
//!
//! [`StoredEnvelope`]: crate::entry::StoredEnvelope

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use vigia_core::TierError;

use crate::tier::KeyValueStore;

/// Persistent string key/value store on LMDB.
pub struct LmdbKvStore {
    /// The LMDB environment.
    env: Env,
    /// The single unnamed database.
    db: Database<Str, Str>,
}

impl LmdbKvStore {
    /// Open (or create) a store at `path` with the given map size.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the LMDB
    /// environment cannot be opened, or the database cannot be created.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, TierError> {
        std::fs::create_dir_all(&path).map_err(|e| TierError::EnvOpen {
            reason: e.to_string(),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| TierError::EnvOpen {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        let db: Database<Str, Str> =
            env.create_database(&mut wtxn, None)
                .map_err(|e| TierError::DbOpen {
                    reason: e.to_string(),
                })?;

        wtxn.commit().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        Ok(Self { env, db })
    }
}

impl KeyValueStore for LmdbKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, TierError> {
        let rtxn = self.env.read_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        let value = self.db.get(&rtxn, key).map_err(|e| TierError::ReadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(value.map(|v| v.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TierError> {
        let mut wtxn = self.env.write_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        self.db
            .put(&mut wtxn, key, value)
            .map_err(|e| match e {
                heed::Error::Mdb(heed::MdbError::MapFull) => TierError::QuotaExceeded {
                    key: key.to_string(),
                },
                other => TierError::WriteFailed {
                    key: key.to_string(),
                    reason: other.to_string(),
                },
            })?;

        wtxn.commit().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })
    }

    fn remove(&self, key: &str) -> Result<(), TierError> {
        let mut wtxn = self.env.write_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        self.db
            .delete(&mut wtxn, key)
            .map_err(|e| TierError::WriteFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        wtxn.commit().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })
    }

    fn clear(&self) -> Result<(), TierError> {
        let mut wtxn = self.env.write_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        self.db.clear(&mut wtxn).map_err(|e| TierError::WriteFailed {
            key: String::new(),
            reason: e.to_string(),
        })?;

        wtxn.commit().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })
    }

    fn keys(&self) -> Result<Vec<String>, TierError> {
        let rtxn = self.env.read_txn().map_err(|e| TierError::Transaction {
            reason: e.to_string(),
        })?;

        let iter = self.db.iter(&rtxn).map_err(|e| TierError::ReadFailed {
            key: String::new(),
            reason: e.to_string(),
        })?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| TierError::ReadFailed {
                key: String::new(),
                reason: e.to_string(),
            })?;
            keys.push(key.to_string());
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::{purge_pattern, purge_prefix};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbKvStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbKvStore::open(temp_dir.path(), 10).expect("open should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_set_and_get() {
        let (store, _temp_dir) = create_test_store();

        store
            .set("compliance_20-12345678-6", "{\"data\":1}")
            .expect("set should succeed");

        assert_eq!(
            store
                .get("compliance_20-12345678-6")
                .expect("get should succeed"),
            Some("{\"data\":1}".to_string())
        );
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get("missing").expect("get should succeed"), None);
    }

    #[test]
    fn test_overwrite() {
        let (store, _temp_dir) = create_test_store();

        store.set("k", "v1").expect("set should succeed");
        store.set("k", "v2").expect("set should succeed");
        assert_eq!(
            store.get("k").expect("get should succeed"),
            Some("v2".to_string())
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _temp_dir) = create_test_store();

        store.set("a", "1").expect("set should succeed");
        store.set("b", "2").expect("set should succeed");

        store.remove("a").expect("remove should succeed");
        assert_eq!(store.get("a").expect("get should succeed"), None);

        store.clear().expect("clear should succeed");
        assert!(store.keys().expect("keys should succeed").is_empty());
    }

    #[test]
    fn test_keys_enumeration() {
        let (store, _temp_dir) = create_test_store();

        store.set("alerts", "1").expect("set should succeed");
        store.set("dashboard_summary", "2").expect("set should succeed");

        let mut keys = store.keys().expect("keys should succeed");
        keys.sort();
        assert_eq!(keys, vec!["alerts", "dashboard_summary"]);
    }

    #[test]
    fn test_purge_helpers_work_on_lmdb() {
        let (store, _temp_dir) = create_test_store();

        store
            .set("compliance_20-12345678-9", "a")
            .expect("set should succeed");
        store
            .set("compliance_dashboard", "b")
            .expect("set should succeed");
        store
            .set("contributor_20-12345678-9", "c")
            .expect("set should succeed");

        assert_eq!(
            purge_pattern(&store, "compliance_").expect("purge should succeed"),
            2
        );
        assert_eq!(
            purge_prefix(&store, "contributor").expect("purge should succeed"),
            1
        );
        assert!(store.keys().expect("keys should succeed").is_empty());
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");

        {
            let store = LmdbKvStore::open(temp_dir.path(), 10).expect("open should succeed");
            store.set("persisted", "yes").expect("set should succeed");
        }

        let store = LmdbKvStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            store.get("persisted").expect("get should succeed"),
            Some("yes".to_string())
        );
    }
}
