//! Vigía Core - Shared data types
//!
//! Core vocabulary for the Vigía compliance-cache engine: the CUIT
//! identifier, the business events that drive invalidation, per-instance
//! cache options, and the error taxonomy shared by every crate in the
//! workspace.

pub mod cuit;
pub mod error;
pub mod event;
pub mod options;

pub use cuit::{Cuit, CuitError};
pub use error::{FetchError, SyncError, TierError, VigiaError, VigiaResult, WorkerError};
pub use event::{BusinessEvent, InvalidationResult};
pub use options::{CacheOptions, CacheTier};
