//! Worker lifecycle: `Installing -> Waiting -> Active`.
//!
//! Install pre-populates the store with the static shell manifest; a
//! failed precache entry is logged and skipped, never blocks the
//! transition. Activation purges every store entry written by another
//! worker version and takes control.

use std::sync::Arc;

use tracing::{info, warn};

use crate::store::ResponseStore;
use crate::strategies::{Network, WorkerRequest};

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
}

/// The static assets installed ahead of any navigation.
pub fn precache_manifest() -> Vec<WorkerRequest> {
    vec![
        WorkerRequest::document("/"),
        WorkerRequest::document("/index.html"),
        WorkerRequest::asset("/assets/app.js"),
        WorkerRequest::asset("/assets/app.css"),
        WorkerRequest::asset("/assets/logo.svg"),
    ]
}

#[derive(Debug)]
pub struct Lifecycle {
    state: WorkerState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Installing,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Precache the manifest and move to `Waiting`.
    ///
    /// Returns the number of manifest entries actually stored.
    pub async fn install(
        &mut self,
        network: &Arc<dyn Network>,
        store: &Arc<ResponseStore>,
        manifest: &[WorkerRequest],
    ) -> u64 {
        debug_assert_eq!(self.state, WorkerState::Installing);

        let mut stored = 0u64;
        for request in manifest {
            match network.fetch(request).await {
                Ok(response) if response.is_ok() => {
                    let entry = crate::store::StoredResponse::new(
                        response.status,
                        response.content_type,
                        response.body,
                    );
                    match store.put(&request.url, &entry) {
                        Ok(()) => stored += 1,
                        Err(e) => warn!(url = %request.url, error = %e, "precache store failed"),
                    }
                }
                Ok(response) => {
                    warn!(url = %request.url, status = response.status, "precache fetch returned error status");
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "precache fetch failed");
                }
            }
        }

        info!(
            stored,
            total = manifest.len(),
            version = store.version(),
            "install complete"
        );
        self.state = WorkerState::Waiting;
        stored
    }

    /// Purge entries from other versions and take control.
    ///
    /// Returns the number of stale entries removed.
    pub fn activate(&mut self, store: &ResponseStore) -> u64 {
        let removed = match store.purge_stale_versions() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "stale version purge failed during activation");
                0
            }
        };
        info!(removed, version = store.version(), "worker active");
        self.state = WorkerState::Active;
        removed
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredResponse;
    use crate::strategies::{ResponseSource, WorkerResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vigia_cache::{InMemoryKvStore, KeyValueStore};
    use vigia_core::WorkerError;

    struct ShellNetwork {
        fail_assets: AtomicBool,
    }

    #[async_trait]
    impl Network for ShellNetwork {
        async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
            if self.fail_assets.load(Ordering::SeqCst) && request.url.starts_with("/assets/") {
                return Err(WorkerError::Network {
                    url: request.url.clone(),
                    reason: "timeout".into(),
                });
            }
            Ok(WorkerResponse {
                status: 200,
                content_type: "text/html".to_string(),
                body: format!("<!-- {} -->", request.url),
                source: ResponseSource::Network,
            })
        }

        async fn online(&self) -> bool {
            true
        }
    }

    fn shared_kv() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryKvStore::new()) as Arc<dyn KeyValueStore>
    }

    #[tokio::test]
    async fn test_install_precaches_and_transitions() {
        let network = Arc::new(ShellNetwork {
            fail_assets: AtomicBool::new(false),
        }) as Arc<dyn Network>;
        let store = Arc::new(ResponseStore::new(shared_kv(), 1));
        let mut lifecycle = Lifecycle::new();

        let manifest = precache_manifest();
        let stored = lifecycle.install(&network, &store, &manifest).await;

        assert_eq!(stored, manifest.len() as u64);
        assert_eq!(lifecycle.state(), WorkerState::Waiting);
        assert!(store.get("/").expect("get should succeed").is_some());
    }

    #[tokio::test]
    async fn test_failed_precache_entries_do_not_block_install() {
        let network = Arc::new(ShellNetwork {
            fail_assets: AtomicBool::new(true),
        }) as Arc<dyn Network>;
        let store = Arc::new(ResponseStore::new(shared_kv(), 1));
        let mut lifecycle = Lifecycle::new();

        let stored = lifecycle.install(&network, &store, &precache_manifest()).await;

        // the two documents stored, the three assets skipped
        assert_eq!(stored, 2);
        assert_eq!(lifecycle.state(), WorkerState::Waiting);
    }

    #[tokio::test]
    async fn test_activation_purges_old_versions() {
        let kv = shared_kv();
        let old = ResponseStore::new(Arc::clone(&kv), 1);
        old.put("/api/alerts", &StoredResponse::new(200, "application/json", "[]"))
            .expect("put should succeed");

        let store = Arc::new(ResponseStore::new(kv, 2));
        store
            .put("/", &StoredResponse::new(200, "text/html", "<html></html>"))
            .expect("put should succeed");

        let mut lifecycle = Lifecycle::new();
        let network = Arc::new(ShellNetwork {
            fail_assets: AtomicBool::new(false),
        }) as Arc<dyn Network>;
        lifecycle.install(&network, &store, &[]).await;

        let removed = lifecycle.activate(&store);
        assert_eq!(removed, 1);
        assert_eq!(lifecycle.state(), WorkerState::Active);
        assert!(store.get("/").expect("get should succeed").is_some());
    }
}
