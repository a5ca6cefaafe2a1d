//! The four caching strategies, as pure functions over a network and a
//! response store.
//!
//! Keeping the strategies free of lifecycle and messaging concerns means
//! each one is testable with a scripted network and an in-memory store.
//! All of them share the same write discipline: only successful responses
//! (status < 400) are stored, and a store write failure is logged, never
//! surfaced, the caller still gets the network response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use vigia_core::WorkerError;

use crate::store::{ResponseStore, StoredResponse};

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A navigation (HTML document)
    Document,
    /// An API data request
    Data,
    /// A static asset
    Asset,
}

/// An outbound request as seen by the worker's interception hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub url: String,
    pub destination: Destination,
}

impl WorkerRequest {
    pub fn data(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: Destination::Data,
        }
    }

    pub fn document(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: Destination::Document,
        }
    }

    pub fn asset(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: Destination::Asset,
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Store,
    Offline,
    Shell,
}

/// A response on its way back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
    pub source: ResponseSource,
}

impl WorkerResponse {
    pub fn from_stored(stored: &StoredResponse, source: ResponseSource) -> Self {
        Self {
            status: stored.status,
            content_type: stored.content_type.clone(),
            body: stored.body.clone(),
            source,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status < 400
    }
}

/// The network seam. The host environment supplies the real transport.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError>;

    /// Connectivity probe for `CHECK_CONNECTION` messages.
    async fn online(&self) -> bool;
}

fn store_response(store: &ResponseStore, url: &str, response: &WorkerResponse) {
    let stored = StoredResponse::new(
        response.status,
        response.content_type.clone(),
        response.body.clone(),
    );
    if let Err(e) = store.put(url, &stored) {
        warn!(url = %url, error = %e, "failed to store response");
    }
}

/// Network first: fresh when the link is up, stored response of any age
/// when it is not.
pub async fn network_first(
    network: &Arc<dyn Network>,
    store: &Arc<ResponseStore>,
    request: &WorkerRequest,
    ttl: Duration,
) -> Result<WorkerResponse, WorkerError> {
    match network.fetch(request).await {
        Ok(response) => {
            if !ttl.is_zero() && response.is_ok() {
                store_response(store, &request.url, &response);
            }
            Ok(response)
        }
        Err(e) => match store.get(&request.url)? {
            Some(stored) => {
                debug!(url = %request.url, "network failed, serving stored response");
                Ok(WorkerResponse::from_stored(&stored, ResponseSource::Store))
            }
            None => Err(e),
        },
    }
}

/// Cache first: a live stored response short-circuits the network; an
/// expired one is still better than a failed fetch.
pub async fn cache_first(
    network: &Arc<dyn Network>,
    store: &Arc<ResponseStore>,
    request: &WorkerRequest,
    ttl: Duration,
) -> Result<WorkerResponse, WorkerError> {
    let stored = store.get(&request.url)?;

    if let Some(stored) = &stored {
        if !stored.is_stale(ttl, Utc::now()) {
            return Ok(WorkerResponse::from_stored(stored, ResponseSource::Store));
        }
    }

    match network.fetch(request).await {
        Ok(response) => {
            if response.is_ok() {
                store_response(store, &request.url, &response);
            }
            Ok(response)
        }
        Err(e) => match stored {
            Some(stored) => {
                debug!(url = %request.url, "network failed, serving expired stored response");
                Ok(WorkerResponse::from_stored(&stored, ResponseSource::Store))
            }
            None => Err(e),
        },
    }
}

/// Stale while revalidate: a stored response is returned immediately; if
/// it is past its TTL a background fetch refreshes the store for future
/// readers. With nothing stored this degrades to network-first.
pub async fn stale_while_revalidate(
    network: &Arc<dyn Network>,
    store: &Arc<ResponseStore>,
    request: &WorkerRequest,
    ttl: Duration,
) -> Result<WorkerResponse, WorkerError> {
    let Some(stored) = store.get(&request.url)? else {
        return network_first(network, store, request, ttl).await;
    };

    if stored.is_stale(ttl, Utc::now()) {
        let network = Arc::clone(network);
        let store = Arc::clone(store);
        let request = request.clone();
        tokio::spawn(async move {
            match network.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    store_response(&store, &request.url, &response);
                }
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, "revalidation got error status, keeping stored response");
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "background revalidation failed");
                }
            }
        });
    }

    Ok(WorkerResponse::from_stored(&stored, ResponseSource::Store))
}

/// Network only: never reads or writes the store.
pub async fn network_only(
    network: &Arc<dyn Network>,
    request: &WorkerRequest,
) -> Result<WorkerResponse, WorkerError> {
    network.fetch(request).await
}

/// Last resort when both the network and the store came up empty.
///
/// API requests get a structured offline payload instead of a raw error;
/// navigations fall back to a stored shell document if one exists.
pub fn offline_fallback(store: &ResponseStore, request: &WorkerRequest) -> Option<WorkerResponse> {
    if request.url.starts_with("/api/") {
        let body = json!({
            "offline": true,
            "error": "Sin conexión con el servidor",
            "timestamp": Utc::now().timestamp_millis(),
        });
        return Some(WorkerResponse {
            status: 503,
            content_type: "application/json".to_string(),
            body: body.to_string(),
            source: ResponseSource::Offline,
        });
    }

    if request.destination == Destination::Document {
        for shell in ["/", "/index.html"] {
            if let Ok(Some(stored)) = store.get(shell) {
                return Some(WorkerResponse::from_stored(&stored, ResponseSource::Shell));
            }
        }
    }

    None
}
