//! Vigía background sync worker: cached network responses for the
//! compliance app, served by per-URL strategy rules.
//!
//! The worker runs in its own context with an exclusively-owned,
//! version-tagged response store. The page reaches it only through the
//! control channel ([`WorkerMessage`] / [`WorkerReply`]); intercepted
//! requests are dispatched to one of four strategies by URL prefix.
//!
//! # Design
//!
//! - **Strategies as pure functions**: each strategy takes the network
//!   seam, the store, and a TTL; lifecycle and messaging stay out of them.
//! - **Versioned store**: keys carry the worker version so activation can
//!   purge everything an older version wrote.
//! - **Offline degradation**: API failures become structured offline
//!   payloads; navigations fall back to the precached shell.

pub mod lifecycle;
pub mod rules;
pub mod store;
pub mod strategies;
pub mod worker;

pub use lifecycle::{precache_manifest, Lifecycle, WorkerState};
pub use rules::{RuleTable, StrategyKind, StrategyRule};
pub use store::{ResponseStore, StoredResponse};
pub use strategies::{
    cache_first, network_first, network_only, offline_fallback, stale_while_revalidate,
    Destination, Network, ResponseSource, WorkerRequest, WorkerResponse,
};
pub use worker::{SyncWorker, WorkerMessage, WorkerReply};
