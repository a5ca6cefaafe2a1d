//! The page cache engine.
//!
//! One engine per logical cache: a base key, a caller-supplied fetcher, and
//! [`CacheOptions`] binding the instance to a single tier. The engine owns
//! the request-level semantics: TTL expiry, deduplication of concurrent
//! identical fetches, optional stale-while-revalidate, pattern and
//! single-key invalidation, and a point-in-time stats snapshot.
//!
//! # Write discipline
//!
//! Entries are written only after a successful fetch. A failed fetch leaves
//! the cache exactly as it was, so a later stale read can still serve the
//! previous value. A write that would land after a matching invalidation
//! (the fetch started before the invalidation, finished after) is dropped:
//! each fetch snapshots the invalidation epoch at start and checks the
//! bounded mark journal before writing.
//!
//! # Fallback discipline
//!
//! A write failure on a serialized tier (quota and the like) is logged and
//! the entry lands in the instance's in-memory overlay instead; the
//! caller's request still succeeds and later reads are served from the
//! overlay. A malformed stored value is logged and treated as a miss.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use vigia_core::{CacheOptions, CacheTier, FetchError, VigiaError, VigiaResult};

use crate::entry::{is_expired, MemoryEntry, StoredEnvelope};
use crate::key::{derive_key, instance_prefix};
use crate::tier::{purge_pattern, purge_prefix, KeyValueStore};

/// Invalidation marks retained for the epoch guard. A fetch that outlives
/// this many subsequent invalidations conservatively drops its write.
const MAX_MARKS: usize = 64;

/// Caller-supplied source of truth for one logical cache.
#[async_trait]
pub trait SourceFetcher<A, T>: Send + Sync {
    /// Fetch the value for the given arguments from the upstream source.
    async fn fetch(&self, args: &A) -> VigiaResult<T>;
}

/// A shared fetcher is a fetcher: callers hand the same `Arc` to several
/// engines (or keep one to inspect from tests) without a wrapper type.
#[async_trait]
impl<A, T, F> SourceFetcher<A, T> for Arc<F>
where
    A: Sync,
    T: Send,
    F: SourceFetcher<A, T> + ?Sized,
{
    async fn fetch(&self, args: &A) -> VigiaResult<T> {
        (**self).fetch(args).await
    }
}

/// Observable fetch state for UI binding.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    /// Most recent successfully fetched or cached value
    pub data: Option<T>,
    /// True while an awaited (non-background) fetch is running
    pub loading: bool,
    /// Message of the most recent failed fetch, cleared on success
    pub error: Option<String>,
}

impl<T> FetchState<T> {
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// One entry in a stats snapshot.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub age: Duration,
    pub expired: bool,
}

/// Point-in-time view of an instance's entries. Never mutates the cache.
#[derive(Debug, Clone)]
pub struct CacheStatsSnapshot {
    pub total_entries: usize,
    pub tier: CacheTier,
    pub ttl: Duration,
    pub entries: Vec<EntrySnapshot>,
}

/// Page-side purge interface the invalidation coordinator fans out to.
///
/// Every engine registers with the coordinator as one of these; the
/// coordinator buckets eviction counts by the reported tier.
pub trait PatternPurge: Send + Sync {
    /// The tier this purgeable's evictions count against.
    fn tier(&self) -> CacheTier;

    /// Remove every entry whose key contains `pattern`; returns the count.
    fn purge_pattern(&self, pattern: &str) -> u64;
}

/// Invalidation mark for the epoch guard.
#[derive(Debug, Clone)]
struct InvalidationMark {
    epoch: u64,
    pattern: String,
}

/// The page cache engine. Cheap to clone; clones share all state.
pub struct CacheEngine<A, T, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: SourceFetcher<A, T> + 'static,
{
    base_key: String,
    prefix: String,
    options: CacheOptions,
    fetcher: Arc<F>,
    /// Memory tier for `Memory` instances; write-fallback overlay for
    /// serialized instances.
    memory: Arc<Mutex<HashMap<String, MemoryEntry<T>>>>,
    /// Backing store for `Session`/`Local` instances; `None` for `Memory`.
    store: Option<Arc<dyn KeyValueStore>>,
    in_flight: Arc<tokio::sync::Mutex<HashMap<String, broadcast::Sender<Result<T, VigiaError>>>>>,
    epoch: Arc<AtomicU64>,
    marks: Arc<Mutex<VecDeque<InvalidationMark>>>,
    state: Arc<watch::Sender<FetchState<T>>>,
    _args: std::marker::PhantomData<fn(&A)>,
}

impl<A, T, F> Clone for CacheEngine<A, T, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: SourceFetcher<A, T> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            base_key: self.base_key.clone(),
            prefix: self.prefix.clone(),
            options: self.options.clone(),
            fetcher: Arc::clone(&self.fetcher),
            memory: Arc::clone(&self.memory),
            store: self.store.clone(),
            in_flight: Arc::clone(&self.in_flight),
            epoch: Arc::clone(&self.epoch),
            marks: Arc::clone(&self.marks),
            state: Arc::clone(&self.state),
            _args: std::marker::PhantomData,
        }
    }
}

impl<A, T, F> CacheEngine<A, T, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: SourceFetcher<A, T> + 'static,
{
    /// Create a memory-tier engine. The tier in `options` is overridden to
    /// `Memory`.
    pub fn in_memory(base_key: impl Into<String>, fetcher: F, options: CacheOptions) -> Self {
        let options = options.with_tier(CacheTier::Memory);
        Self::build(base_key.into(), fetcher, options, None)
    }

    /// Create an engine over a serialized tier (session or local).
    ///
    /// The store decides the tier's lifetime; `options.tier` decides which
    /// bucket this instance's evictions count against. A `Memory` tier in
    /// `options` is rejected here, use [`in_memory`].
    ///
    /// [`in_memory`]: Self::in_memory
    pub fn with_store(
        base_key: impl Into<String>,
        fetcher: F,
        options: CacheOptions,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        debug_assert_ne!(options.tier, CacheTier::Memory);
        Self::build(base_key.into(), fetcher, options, Some(store))
    }

    fn build(
        base_key: String,
        fetcher: F,
        options: CacheOptions,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let prefix = instance_prefix(&base_key, &options.depends_on);
        let (state_tx, _state_rx) = watch::channel(FetchState::default());
        Self {
            base_key,
            prefix,
            options,
            fetcher: Arc::new(fetcher),
            memory: Arc::new(Mutex::new(HashMap::new())),
            store,
            in_flight: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            epoch: Arc::new(AtomicU64::new(0)),
            marks: Arc::new(Mutex::new(VecDeque::new())),
            state: Arc::new(state_tx),
            _args: std::marker::PhantomData,
        }
    }

    /// The instance's base key.
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// The instance's options.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Current fetch state (UI binding: `data`, `loading`, `error`).
    pub fn state(&self) -> FetchState<T> {
        self.state.borrow().clone()
    }

    /// Subscribe to fetch-state changes.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.subscribe()
    }

    // ========================================================================
    // FETCH PATH
    // ========================================================================

    /// Fetch the value for `args`, consulting the cache first.
    ///
    /// A live entry returns without invoking the fetcher. An expired entry
    /// with stale-while-revalidate enabled returns immediately while a
    /// background refresh runs. Otherwise the fetcher runs (deduplicated
    /// per derived key) and the result is cached on success.
    pub async fn fetch(&self, args: &A) -> VigiaResult<T> {
        let key = derive_key(&self.base_key, &self.options.depends_on, args)?;

        if let Some((value, expired)) = self.read_entry(&key) {
            if !expired {
                debug!(key = %key, "cache hit");
                self.push_success(&value);
                return Ok(value);
            }
            if self.options.stale_while_revalidate {
                debug!(key = %key, "serving stale, revalidating in background");
                self.spawn_revalidate(key, args.clone());
                return Ok(value);
            }
        }

        self.fetch_deduplicated(&key, args).await
    }

    /// Miss path: join an in-flight fetch for this key or become the one
    /// that drives it.
    async fn fetch_deduplicated(&self, key: &str, args: &A) -> VigiaResult<T> {
        enum Role<T> {
            Waiter(broadcast::Receiver<Result<T, VigiaError>>),
            Driver(broadcast::Sender<Result<T, VigiaError>>),
        }

        let role = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(key) {
                Some(tx) => Role::Waiter(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    in_flight.insert(key.to_string(), tx.clone());
                    Role::Driver(tx)
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(VigiaError::Fetch(FetchError::Upstream {
                    reason: "in-flight request dropped before settling".into(),
                })),
            },
            Role::Driver(tx) => self.drive_fetch(key, args, tx).await,
        }
    }

    /// Run the fetcher for `key`, write on success, settle waiters.
    ///
    /// The in-flight entry is removed the instant the fetch settles,
    /// before waiters observe the result.
    async fn drive_fetch(
        &self,
        key: &str,
        args: &A,
        tx: broadcast::Sender<Result<T, VigiaError>>,
    ) -> VigiaResult<T> {
        let start_epoch = self.epoch.load(Ordering::SeqCst);
        self.state.send_modify(|s| s.loading = true);

        let outcome = self.fetcher.fetch(args).await;

        if let Ok(value) = &outcome {
            self.write_guarded(key, value.clone(), start_epoch);
            self.push_success(value);
        } else if let Err(e) = &outcome {
            self.push_error(e);
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(key);
        }
        let _ = tx.send(outcome.clone());

        outcome
    }

    fn spawn_revalidate(&self, key: String, args: A) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.fetch_deduplicated(&key, &args).await {
                warn!(key = %key, error = %e, "background revalidation failed");
            }
        });
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Remove the single entry for `args` from the configured tier (and the
    /// memory overlay). No-op if absent.
    pub fn invalidate(&self, args: &A) -> VigiaResult<()> {
        let key = derive_key(&self.base_key, &self.options.depends_on, args)?;
        self.record_mark(&key);

        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(&key);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(&key) {
                warn!(key = %key, error = %e, "store remove failed during invalidation");
            }
        }
        Ok(())
    }

    /// Invalidate, then fetch bypassing both the cache and the in-flight
    /// map. A revalidation racing this call is last-write-wins on the
    /// stored timestamp; the accepted cost is one stale overwrite.
    pub async fn invalidate_and_refetch(&self, args: &A) -> VigiaResult<T> {
        self.invalidate(args)?;
        let key = derive_key(&self.base_key, &self.options.depends_on, args)?;

        let start_epoch = self.epoch.load(Ordering::SeqCst);
        self.state.send_modify(|s| s.loading = true);

        match self.fetcher.fetch(args).await {
            Ok(value) => {
                self.write_guarded(&key, value.clone(), start_epoch);
                self.push_success(&value);
                Ok(value)
            }
            Err(e) => {
                self.push_error(&e);
                Err(e)
            }
        }
    }

    /// Remove every entry of this instance (by base-key prefix) from its
    /// tier. Returns the number of entries removed.
    pub fn clear(&self) -> u64 {
        self.record_mark(&self.prefix);

        let mut removed = 0u64;
        if let Ok(mut memory) = self.memory.lock() {
            let before = memory.len();
            memory.retain(|key, _| !key.starts_with(&self.prefix));
            removed += (before - memory.len()) as u64;
        }
        if let Some(store) = &self.store {
            match purge_prefix(store.as_ref(), &self.prefix) {
                Ok(count) => removed += count,
                Err(e) => warn!(prefix = %self.prefix, error = %e, "store clear failed"),
            }
        }
        removed
    }

    fn record_mark(&self, pattern: &str) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut marks) = self.marks.lock() {
            marks.push_back(InvalidationMark {
                epoch,
                pattern: pattern.to_string(),
            });
            while marks.len() > MAX_MARKS {
                marks.pop_front();
            }
        }
    }

    /// Whether a matching invalidation landed after `start_epoch`.
    ///
    /// A fetch older than the retained mark window cannot prove otherwise
    /// and is treated as invalidated.
    fn invalidated_since(&self, key: &str, start_epoch: u64) -> bool {
        let current = self.epoch.load(Ordering::SeqCst);
        if current == start_epoch {
            return false;
        }
        match self.marks.lock() {
            Ok(marks) => {
                let oldest_retained = marks.front().map(|m| m.epoch).unwrap_or(u64::MAX);
                if start_epoch + 1 < oldest_retained && current > start_epoch {
                    return true;
                }
                marks
                    .iter()
                    .any(|m| m.epoch > start_epoch && key.contains(&m.pattern))
            }
            Err(_) => true,
        }
    }

    // ========================================================================
    // TIER READ/WRITE
    // ========================================================================

    /// Read the entry for `key` from this instance's tier.
    ///
    /// Returns the value and whether it is expired. Read and
    /// deserialization failures are logged and reported as a miss.
    fn read_entry(&self, key: &str) -> Option<(T, bool)> {
        // overlay first: it only holds keys whose store write failed, which
        // makes it the freshest copy
        if let Ok(memory) = self.memory.lock() {
            if let Some(entry) = memory.get(key) {
                return Some((entry.value.clone(), entry.is_expired(Utc::now())));
            }
        }

        let store = self.store.as_ref()?;
        let raw = match store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "store read failed, treating as miss");
                return None;
            }
        };

        let envelope = match StoredEnvelope::decode(key, &raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "malformed cache entry, treating as miss");
                return None;
            }
        };
        let value: T = match envelope.unwrap_value(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache payload, treating as miss");
                return None;
            }
        };

        let expired = is_expired(envelope.stored_at(), self.options.ttl, Utc::now());
        Some((value, expired))
    }

    /// Write an entry unless a matching invalidation landed after
    /// `start_epoch`.
    fn write_guarded(&self, key: &str, value: T, start_epoch: u64) {
        if self.options.ttl.is_zero() {
            return;
        }
        if self.invalidated_since(key, start_epoch) {
            debug!(key = %key, "dropping write superseded by invalidation");
            return;
        }
        self.write_entry(key, value);
    }

    fn write_entry(&self, key: &str, value: T) {
        let Some(store) = &self.store else {
            if let Ok(mut memory) = self.memory.lock() {
                memory.insert(key.to_string(), MemoryEntry::new(value, self.options.ttl));
            }
            return;
        };

        let encoded = StoredEnvelope::wrap(&value).and_then(|envelope| envelope.encode());
        let write = encoded.and_then(|raw| store.set(key, &raw));
        if let Err(e) = write {
            warn!(
                key = %key,
                tier = self.options.tier.as_str(),
                error = %e,
                "tier write failed, falling back to memory"
            );
            if let Ok(mut memory) = self.memory.lock() {
                memory.insert(key.to_string(), MemoryEntry::new(value, self.options.ttl));
            }
            return;
        }

        // a fresh store write supersedes any overlay copy
        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(key);
        }
    }

    // ========================================================================
    // OBSERVABILITY
    // ========================================================================

    /// Snapshot this instance's entries. Never mutates the cache.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let now = Utc::now();
        let mut entries: BTreeMap<String, EntrySnapshot> = BTreeMap::new();

        if let Some(store) = &self.store {
            if let Ok(keys) = store.keys() {
                for key in keys.into_iter().filter(|k| k.starts_with(&self.prefix)) {
                    let Ok(Some(raw)) = store.get(&key) else {
                        continue;
                    };
                    let Ok(envelope) = StoredEnvelope::decode(&key, &raw) else {
                        continue;
                    };
                    let stored_at = envelope.stored_at();
                    entries.insert(
                        key.clone(),
                        EntrySnapshot {
                            key,
                            stored_at,
                            age: (now - stored_at).to_std().unwrap_or(Duration::ZERO),
                            expired: is_expired(stored_at, self.options.ttl, now),
                        },
                    );
                }
            }
        }

        if let Ok(memory) = self.memory.lock() {
            for (key, entry) in memory.iter().filter(|(k, _)| k.starts_with(&self.prefix)) {
                entries.insert(
                    key.clone(),
                    EntrySnapshot {
                        key: key.clone(),
                        stored_at: entry.stored_at,
                        age: (now - entry.stored_at).to_std().unwrap_or(Duration::ZERO),
                        expired: entry.is_expired(now),
                    },
                );
            }
        }

        let entries: Vec<EntrySnapshot> = entries.into_values().collect();
        CacheStatsSnapshot {
            total_entries: entries.len(),
            tier: self.options.tier,
            ttl: self.options.ttl,
            entries,
        }
    }

    fn push_success(&self, value: &T) {
        let value = value.clone();
        self.state.send_modify(|s| {
            s.data = Some(value);
            s.loading = false;
            s.error = None;
        });
    }

    fn push_error(&self, error: &VigiaError) {
        let message = error.to_string();
        self.state.send_modify(|s| {
            s.loading = false;
            s.error = Some(message);
        });
    }
}

impl<A, T, F> PatternPurge for CacheEngine<A, T, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: SourceFetcher<A, T> + 'static,
{
    fn tier(&self) -> CacheTier {
        self.options.tier
    }

    fn purge_pattern(&self, pattern: &str) -> u64 {
        self.record_mark(pattern);

        let mut removed = 0u64;
        if let Ok(mut memory) = self.memory.lock() {
            let before = memory.len();
            memory.retain(|key, _| !key.contains(pattern));
            removed += (before - memory.len()) as u64;
        }
        if let Some(store) = &self.store {
            match purge_pattern(store.as_ref(), pattern) {
                Ok(count) => removed += count,
                Err(e) => warn!(pattern = %pattern, error = %e, "store pattern purge failed"),
            }
        }
        removed
    }
}
