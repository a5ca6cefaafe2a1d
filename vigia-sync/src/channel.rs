//! Page-side bridge to the worker's control channel.
//!
//! Every request carries a generated correlation id; a dispatcher task
//! routes replies back to the waiting caller by id, so any number of
//! invalidation round-trips can be in flight at once. Waits are bounded:
//! a missed acknowledgement surfaces as [`SyncError::AckTimeout`], never
//! as a hang.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use vigia_core::SyncError;
use vigia_worker::{WorkerMessage, WorkerReply};

/// Default bound on acknowledgement waits.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<WorkerReply>>>>;

/// Correlated request/reply channel to the worker.
#[derive(Clone)]
pub struct WorkerBridge {
    tx: mpsc::Sender<WorkerMessage>,
    pending: PendingMap,
    ack_timeout: Duration,
}

impl WorkerBridge {
    /// Wire up a bridge over the worker's channel ends and spawn the
    /// reply dispatcher.
    pub fn connect(
        tx: mpsc::Sender<WorkerMessage>,
        mut reply_rx: mpsc::Receiver<WorkerReply>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let dispatcher_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                let id = match &reply {
                    WorkerReply::PatternInvalidated { id, .. } => *id,
                    WorkerReply::ConnectionStatus { id, .. } => *id,
                };
                let waiter = dispatcher_pending.lock().await.remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    // the caller timed out and gave up; drop the late reply
                    None => debug!(%id, "discarding unclaimed worker reply"),
                }
            }
        });

        Self {
            tx,
            pending,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// `request_label` names the request in timeout errors, e.g.
    /// `invalidation of "compliance_"` or `connection check`.
    async fn round_trip(
        &self,
        id: Uuid,
        message: WorkerMessage,
        request_label: &str,
    ) -> Result<WorkerReply, SyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        if self.tx.send(message).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(SyncError::ChannelClosed);
        }

        match tokio::time::timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(SyncError::ChannelClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SyncError::AckTimeout {
                    request: request_label.to_string(),
                    waited: self.ack_timeout,
                })
            }
        }
    }

    /// Ask the worker to purge every stored response whose URL contains
    /// `pattern`. Returns the worker's eviction count.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, SyncError> {
        let id = Uuid::new_v4();
        let reply = self
            .round_trip(
                id,
                WorkerMessage::InvalidatePattern {
                    id,
                    pattern: pattern.to_string(),
                },
                &format!("invalidation of {pattern:?}"),
            )
            .await?;

        match reply {
            WorkerReply::PatternInvalidated {
                removed,
                success: true,
                ..
            } => Ok(removed),
            WorkerReply::PatternInvalidated { error, .. } => Err(SyncError::WorkerFailure {
                pattern: pattern.to_string(),
                reason: error.unwrap_or_else(|| "unspecified".to_string()),
            }),
            other => {
                warn!(?other, "mismatched reply type for invalidation");
                Err(SyncError::ChannelClosed)
            }
        }
    }

    /// Probe the worker's connectivity.
    pub async fn check_connection(&self) -> Result<bool, SyncError> {
        let id = Uuid::new_v4();
        match self
            .round_trip(id, WorkerMessage::CheckConnection { id }, "connection check")
            .await?
        {
            WorkerReply::ConnectionStatus { online, .. } => Ok(online),
            other => {
                warn!(?other, "mismatched reply type for connection check");
                Err(SyncError::ChannelClosed)
            }
        }
    }

    /// Tell a waiting worker to activate immediately. Fire and forget.
    pub async fn skip_waiting(&self) -> Result<(), SyncError> {
        self.tx
            .send(WorkerMessage::SkipWaiting)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}
