//! Vigía page cache: multi-tier read-through caching for page data.
//!
//! The crate is organized around one type, [`CacheEngine`]: a read-through
//! cache instance bound to a base key, a fetcher, and a tier. Engines over
//! the memory tier keep typed values in-process; engines over the session
//! and local tiers serialize through a [`KeyValueStore`] (an in-memory
//! store for tests and the session tier, an LMDB store for the local tier).
//!
//! # Design
//!
//! - **Read-through**: callers only ever ask for the value; the engine
//!   decides between cache hit, stale serve, and upstream fetch.
//! - **Deduplication**: concurrent fetches for the same derived key share
//!   one upstream request.
//! - **Pattern invalidation**: keys embed their arguments as flat segments
//!   so substring patterns reach across instances; [`PatternPurge`] is the
//!   seam the cross-context coordinator fans out to.

pub mod engine;
pub mod entry;
pub mod key;
pub mod lmdb_store;
pub mod tier;

pub use engine::{
    CacheEngine, CacheStatsSnapshot, EntrySnapshot, FetchState, PatternPurge, SourceFetcher,
};
pub use entry::{is_expired, MemoryEntry, StoredEnvelope};
pub use key::{derive_key, instance_prefix};
pub use lmdb_store::LmdbKvStore;
pub use tier::{purge_pattern, purge_prefix, InMemoryKvStore, KeyValueStore};

pub use vigia_core::{CacheOptions, CacheTier};
