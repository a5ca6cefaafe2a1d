//! The background sync worker: strategy dispatch plus the control-message
//! loop the page talks to.
//!
//! The worker owns its response store outright; the page can only reach
//! it through [`WorkerMessage`]s, each carrying a correlation id that the
//! matching [`WorkerReply`] echoes back. A handler-side failure is
//! reported in the reply (`success: false`), never by crashing the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigia_cache::KeyValueStore;
use vigia_core::WorkerError;

use crate::lifecycle::{precache_manifest, Lifecycle, WorkerState};
use crate::rules::{RuleTable, StrategyKind};
use crate::store::ResponseStore;
use crate::strategies::{
    cache_first, network_first, network_only, offline_fallback, stale_while_revalidate, Network,
    WorkerRequest, WorkerResponse,
};

/// Control messages from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    InvalidatePattern { id: Uuid, pattern: String },
    CheckConnection { id: Uuid },
    SkipWaiting,
}

/// Replies to the page, correlated by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    PatternInvalidated {
        id: Uuid,
        pattern: String,
        removed: u64,
        success: bool,
        error: Option<String>,
    },
    ConnectionStatus {
        id: Uuid,
        online: bool,
    },
}

/// Channel capacity for both directions of the control channel.
const CHANNEL_CAPACITY: usize = 16;

pub struct SyncWorker {
    network: Arc<dyn Network>,
    store: Arc<ResponseStore>,
    rules: RuleTable,
    lifecycle: Lifecycle,
}

impl SyncWorker {
    pub fn new(
        network: Arc<dyn Network>,
        kv: Arc<dyn KeyValueStore>,
        version: u32,
        rules: RuleTable,
    ) -> Self {
        Self {
            network,
            store: Arc::new(ResponseStore::new(kv, version)),
            rules,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    /// Run install and activation back to back: precache the shell
    /// manifest, purge stale-version entries, take control.
    pub async fn start(&mut self) {
        let manifest = precache_manifest();
        self.lifecycle
            .install(&self.network, &self.store, &manifest)
            .await;
        self.lifecycle.activate(&self.store);
    }

    /// Satisfy one intercepted request via its matching strategy.
    ///
    /// When both the strategy and its own fallbacks fail, API requests
    /// and navigations get the offline fallback; anything else propagates
    /// the failure.
    pub async fn handle_fetch(
        &self,
        request: &WorkerRequest,
    ) -> Result<WorkerResponse, WorkerError> {
        let rule = self.rules.resolve(&request.url);
        debug!(url = %request.url, strategy = rule.strategy.as_str(), "dispatching request");

        let outcome = match rule.strategy {
            StrategyKind::NetworkFirst => {
                network_first(&self.network, &self.store, request, rule.ttl).await
            }
            StrategyKind::CacheFirst => {
                cache_first(&self.network, &self.store, request, rule.ttl).await
            }
            StrategyKind::StaleWhileRevalidate => {
                stale_while_revalidate(&self.network, &self.store, request, rule.ttl).await
            }
            StrategyKind::NetworkOnly => network_only(&self.network, request).await,
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(e) => match offline_fallback(&self.store, request) {
                Some(fallback) => {
                    warn!(url = %request.url, error = %e, "serving offline fallback");
                    Ok(fallback)
                }
                None => Err(e),
            },
        }
    }

    fn handle_invalidate(&self, id: Uuid, pattern: &str) -> WorkerReply {
        match self.store.purge_pattern(pattern) {
            Ok(removed) => {
                info!(pattern = %pattern, removed, "invalidated stored responses");
                WorkerReply::PatternInvalidated {
                    id,
                    pattern: pattern.to_string(),
                    removed,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                error!(pattern = %pattern, error = %e, "worker-side invalidation failed");
                WorkerReply::PatternInvalidated {
                    id,
                    pattern: pattern.to_string(),
                    removed: 0,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// The control-message loop. Runs until the page side hangs up.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<WorkerMessage>,
        reply_tx: mpsc::Sender<WorkerReply>,
    ) {
        while let Some(message) = rx.recv().await {
            let reply = match message {
                WorkerMessage::InvalidatePattern { id, pattern } => {
                    Some(self.handle_invalidate(id, &pattern))
                }
                WorkerMessage::CheckConnection { id } => Some(WorkerReply::ConnectionStatus {
                    id,
                    online: self.network.online().await,
                }),
                WorkerMessage::SkipWaiting => {
                    if self.lifecycle.state() == WorkerState::Waiting {
                        self.lifecycle.activate(&self.store);
                    }
                    None
                }
            };
            if let Some(reply) = reply {
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }
        debug!("worker control channel closed, shutting down");
    }

    /// Spawn the control loop; returns the page-side channel ends.
    pub fn spawn(self) -> (mpsc::Sender<WorkerMessage>, mpsc::Receiver<WorkerReply>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.run(rx, reply_tx));
        (tx, reply_rx)
    }
}
