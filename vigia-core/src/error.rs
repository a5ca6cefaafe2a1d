//! Error types for Vigía operations

use std::time::Duration;
use thiserror::Error;

/// Storage-tier errors.
///
/// Read-side failures (including malformed stored values) are recovered by
/// the engine as cache misses; write-side failures on a persisted tier fall
/// back to the in-memory overlay. They only surface to callers when a tier
/// cannot be opened at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TierError {
    #[error("Failed to open store environment: {reason}")]
    EnvOpen { reason: String },

    #[error("Failed to open database: {reason}")]
    DbOpen { reason: String },

    #[error("Transaction error: {reason}")]
    Transaction { reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization error for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Storage quota exceeded writing key {key}")]
    QuotaExceeded { key: String },
}

/// Upstream fetch errors.
///
/// Raised by the caller-supplied fetcher; propagated unchanged, never
/// written to any tier, and never evicting an existing stale entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Upstream fetch failed: {reason}")]
    Upstream { reason: String },

    #[error("Network unreachable: {reason}")]
    Network { reason: String },
}

/// Background-worker errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Network request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("No network and no stored response for {url}")]
    Unavailable { url: String },

    #[error("Response store error: {reason}")]
    Store { reason: String },

    #[error("Worker channel closed")]
    ChannelClosed,
}

/// Cross-context invalidation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Worker did not acknowledge {request} within {waited:?}")]
    AckTimeout { request: String, waited: Duration },

    #[error("Worker channel closed before acknowledgement")]
    ChannelClosed,

    #[error("Worker-side invalidation failed for {pattern:?}: {reason}")]
    WorkerFailure { pattern: String, reason: String },
}

/// Top-level error type wrapping all subsystems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VigiaError {
    #[error(transparent)]
    Tier(#[from] TierError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result alias used throughout the workspace.
pub type VigiaResult<T> = Result<T, VigiaError>;

impl VigiaError {
    /// True when the error originated in the caller-supplied fetcher.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}
