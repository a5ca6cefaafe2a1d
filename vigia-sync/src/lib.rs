//! Vigía cross-context invalidation: business events fanned out to the
//! page cache tiers and to the sync worker's response store.
//!
//! The page and the worker share no memory; the only thing crossing the
//! boundary is a correlated request/reply message. [`WorkerBridge`] owns
//! that protocol (ids, pending replies, bounded waits) and
//! [`InvalidationCoordinator`] owns the policy (event to pattern list,
//! purge fan-out, per-tier counting).

pub mod channel;
pub mod coordinator;

pub use channel::{WorkerBridge, DEFAULT_ACK_TIMEOUT};
pub use coordinator::InvalidationCoordinator;
