//! Business-event invalidation fan-out.
//!
//! The coordinator holds every registered page-side cache (as
//! [`PatternPurge`] handles) plus an optional bridge to the worker. One
//! business event expands to its pattern list; each pattern is purged
//! from every page tier synchronously, then pushed to the worker with a
//! bounded acknowledgement wait. Page-side counts are always exact; a
//! worker timeout leaves the worker count unknown rather than failing
//! the call, and is not retried.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use vigia_cache::PatternPurge;
use vigia_core::{BusinessEvent, CacheTier, InvalidationResult, SyncError};

use crate::channel::WorkerBridge;

#[derive(Default)]
pub struct InvalidationCoordinator {
    engines: Vec<Arc<dyn PatternPurge>>,
    worker: Option<WorkerBridge>,
}

impl InvalidationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page-side cache to receive pattern purges.
    pub fn register(&mut self, engine: Arc<dyn PatternPurge>) {
        self.engines.push(engine);
    }

    /// Attach the worker bridge.
    pub fn with_worker(mut self, worker: WorkerBridge) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Fan one event's patterns out across every registered cache and the
    /// worker. Returns one result per pattern, in pattern order.
    pub async fn invalidate_by_event(&self, event: &BusinessEvent) -> Vec<InvalidationResult> {
        let patterns = event.patterns();
        info!(event = event.name(), patterns = patterns.len(), "invalidating by event");

        let mut results = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            results.push(self.invalidate_pattern(&pattern).await);
        }
        results
    }

    /// Loosely-typed entry point for callers holding only an event name.
    /// Unknown names are logged and ignored.
    pub async fn invalidate_by_event_name(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Vec<InvalidationResult> {
        match BusinessEvent::from_name(name, payload) {
            Some(event) => self.invalidate_by_event(&event).await,
            None => {
                warn!(event = name, "unknown invalidation event, ignoring");
                Vec::new()
            }
        }
    }

    /// Purge one pattern everywhere, bucketing page-side counts by tier.
    async fn invalidate_pattern(&self, pattern: &str) -> InvalidationResult {
        let mut memory_cleared = 0u64;
        let mut session_cleared = 0u64;
        let mut local_cleared = 0u64;

        for engine in &self.engines {
            let removed = engine.purge_pattern(pattern);
            match engine.tier() {
                CacheTier::Memory => memory_cleared += removed,
                CacheTier::Session => session_cleared += removed,
                CacheTier::Local => local_cleared += removed,
            }
        }

        let worker_cleared = match &self.worker {
            Some(bridge) => match bridge.invalidate_pattern(pattern).await {
                Ok(removed) => Some(removed),
                Err(SyncError::AckTimeout { waited, .. }) => {
                    warn!(
                        pattern = %pattern,
                        ?waited,
                        "worker did not acknowledge invalidation, outcome unknown"
                    );
                    None
                }
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "worker-side invalidation failed");
                    None
                }
            },
            None => None,
        };

        InvalidationResult {
            pattern: pattern.to_string(),
            memory_cleared,
            session_cleared,
            local_cleared,
            worker_cleared,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vigia_cache::{purge_pattern as purge_kv, InMemoryKvStore, KeyValueStore};
    use vigia_core::Cuit;
    use vigia_worker::{WorkerMessage, WorkerReply};

    /// Minimal purgeable over a raw key/value map, one per tier.
    struct TierStub {
        tier: CacheTier,
        kv: InMemoryKvStore,
        purged: Mutex<Vec<String>>,
    }

    impl TierStub {
        fn new(tier: CacheTier, keys: &[&str]) -> Arc<Self> {
            let kv = InMemoryKvStore::new();
            for key in keys {
                kv.set(key, "{}").expect("set should succeed");
            }
            Arc::new(Self {
                tier,
                kv,
                purged: Mutex::new(Vec::new()),
            })
        }
    }

    impl PatternPurge for TierStub {
        fn tier(&self) -> CacheTier {
            self.tier
        }

        fn purge_pattern(&self, pattern: &str) -> u64 {
            self.purged
                .lock()
                .expect("lock should not be poisoned")
                .push(pattern.to_string());
            purge_kv(&self.kv, pattern).expect("purge should succeed")
        }
    }

    fn echo_worker(removed_per_call: u64) -> WorkerBridge {
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(8);
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>(8);
        tokio::spawn(async move {
            while let Some(WorkerMessage::InvalidatePattern { id, pattern }) = rx.recv().await {
                let reply = WorkerReply::PatternInvalidated {
                    id,
                    pattern,
                    removed: removed_per_call,
                    success: true,
                    error: None,
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        });
        WorkerBridge::connect(tx, reply_rx)
    }

    fn test_cuit() -> Cuit {
        Cuit::from_prefix([2, 0, 1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[tokio::test]
    async fn test_event_fans_out_across_tiers_and_worker() {
        let memory = TierStub::new(
            CacheTier::Memory,
            &["compliance_20-12345678-6", "compliance_dashboard_x"],
        );
        let session = TierStub::new(CacheTier::Session, &["dashboard_summary_main"]);
        let local = TierStub::new(CacheTier::Local, &["contributor_20-12345678-6"]);

        let mut coordinator = InvalidationCoordinator::new().with_worker(echo_worker(5));
        coordinator.register(Arc::clone(&memory) as Arc<dyn PatternPurge>);
        coordinator.register(Arc::clone(&session) as Arc<dyn PatternPurge>);
        coordinator.register(Arc::clone(&local) as Arc<dyn PatternPurge>);

        let event = BusinessEvent::ComplianceCheckCompleted { cuit: test_cuit() };
        let results = coordinator.invalidate_by_event(&event).await;

        // one result per pattern, in pattern order
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].pattern, "compliance_20-12345678-6");

        assert_eq!(results[0].memory_cleared, 1);
        assert_eq!(results[1].memory_cleared, 1); // compliance_dashboard
        assert_eq!(results[2].session_cleared, 1); // dashboard_summary

        // untouched tier: the contributor entry survives
        assert!(results.iter().all(|r| r.local_cleared == 0));

        // every pattern acknowledged by the worker
        assert!(results.iter().all(|r| r.worker_cleared == Some(5)));
    }

    #[tokio::test]
    async fn test_pattern_breadth_spares_other_resources() {
        let memory = TierStub::new(
            CacheTier::Memory,
            &[
                "compliance_20-12345678-9",
                "compliance_dashboard",
                "contributor_20-12345678-9",
            ],
        );

        let mut coordinator = InvalidationCoordinator::new();
        coordinator.register(Arc::clone(&memory) as Arc<dyn PatternPurge>);

        let result = coordinator.invalidate_pattern("compliance_").await;

        assert_eq!(result.memory_cleared, 2);
        assert!(memory
            .kv
            .get("contributor_20-12345678-9")
            .expect("get should succeed")
            .is_some());
    }

    #[tokio::test]
    async fn test_worker_timeout_leaves_count_unknown() {
        let memory = TierStub::new(CacheTier::Memory, &["session_status_current"]);

        // a worker that never replies
        let (tx, _rx) = mpsc::channel::<WorkerMessage>(8);
        let (_reply_tx, reply_rx) = mpsc::channel::<WorkerReply>(8);
        let silent =
            WorkerBridge::connect(tx, reply_rx).with_ack_timeout(Duration::from_millis(50));

        let mut coordinator = InvalidationCoordinator::new().with_worker(silent);
        coordinator.register(Arc::clone(&memory) as Arc<dyn PatternPurge>);

        let results = coordinator
            .invalidate_by_event(&BusinessEvent::SessionRenewed)
            .await;

        // page-side purge completed even though the worker stayed silent
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_cleared, 1);
        assert_eq!(results[0].worker_cleared, None);
    }

    #[tokio::test]
    async fn test_unknown_event_name_is_a_no_op() {
        let memory = TierStub::new(CacheTier::Memory, &["alerts_list"]);
        let mut coordinator = InvalidationCoordinator::new();
        coordinator.register(Arc::clone(&memory) as Arc<dyn PatternPurge>);

        let results = coordinator
            .invalidate_by_event_name("ocr-finished", &serde_json::json!({}))
            .await;

        assert!(results.is_empty());
        assert!(memory
            .purged
            .lock()
            .expect("lock should not be poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn test_event_name_entry_point_resolves_payload() {
        let memory = TierStub::new(CacheTier::Memory, &["contributor_20-12345678-6_detail"]);
        let mut coordinator = InvalidationCoordinator::new();
        coordinator.register(Arc::clone(&memory) as Arc<dyn PatternPurge>);

        let results = coordinator
            .invalidate_by_event_name(
                "contributor-updated",
                &serde_json::json!({ "cuit": "20-12345678-6" }),
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].memory_cleared, 1);
    }
}
