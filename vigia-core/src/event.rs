//! Business events driving cache invalidation.
//!
//! Mutations are announced as named domain events rather than exact cache
//! keys; each event expands to an ordered list of key patterns that are
//! matched by substring containment. Broad patterns are deliberate: an
//! extra eviction is cheaper than serving a stale compliance verdict.

use crate::cuit::Cuit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A domain occurrence that invalidates cached data.
///
/// The set of events is closed: adding one forces the `patterns` match to
/// be extended, so an event without an invalidation mapping cannot exist.
/// External callers holding only a string event name go through
/// [`BusinessEvent::from_name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusinessEvent {
    /// A compliance check finished for a contributor.
    ComplianceCheckCompleted {
        /// The contributor that was checked
        cuit: Cuit,
    },

    /// A contributor's registration data changed.
    ContributorUpdated {
        /// The contributor that changed
        cuit: Cuit,
    },

    /// A new contributor was registered.
    ContributorCreated,

    /// Stored compliance history for a contributor was purged.
    ComplianceHistoryPurged {
        /// The contributor whose history was purged
        cuit: Cuit,
    },

    /// Outstanding alerts were acknowledged.
    AlertsAcknowledged,

    /// The fiscal-authority session token was renewed.
    SessionRenewed,
}

impl BusinessEvent {
    /// The ordered list of cache-key patterns this event purges.
    ///
    /// Patterns are substrings, not prefixes or regexes; any key containing
    /// one of them is evicted from every tier and from the worker store.
    pub fn patterns(&self) -> Vec<String> {
        match self {
            Self::ComplianceCheckCompleted { cuit } => vec![
                format!("compliance_{cuit}"),
                "compliance_dashboard".to_string(),
                "dashboard_summary".to_string(),
            ],
            Self::ContributorUpdated { cuit } => vec![
                format!("contributor_{cuit}"),
                "contributors_list".to_string(),
                "dashboard_summary".to_string(),
            ],
            Self::ContributorCreated => vec![
                "contributors_list".to_string(),
                "dashboard_summary".to_string(),
            ],
            Self::ComplianceHistoryPurged { cuit } => {
                vec![format!("compliance_{cuit}")]
            }
            Self::AlertsAcknowledged => vec![
                "alerts".to_string(),
                "dashboard_summary".to_string(),
            ],
            Self::SessionRenewed => vec!["session_status".to_string()],
        }
    }

    /// Resolve a loosely-typed `(name, payload)` pair into an event.
    ///
    /// Returns `None` for unknown names or payloads missing a required
    /// `cuit` field; the caller decides whether that is a warning or an
    /// error (the coordinator treats it as a logged no-op).
    pub fn from_name(name: &str, payload: &serde_json::Value) -> Option<Self> {
        let cuit_of = |payload: &serde_json::Value| -> Option<Cuit> {
            payload
                .get("cuit")
                .and_then(|v| v.as_str())
                .and_then(|s| Cuit::parse(s).ok())
        };

        match name {
            "compliance-check-completed" => Some(Self::ComplianceCheckCompleted {
                cuit: cuit_of(payload)?,
            }),
            "contributor-updated" => Some(Self::ContributorUpdated {
                cuit: cuit_of(payload)?,
            }),
            "contributor-created" => Some(Self::ContributorCreated),
            "compliance-history-purged" => Some(Self::ComplianceHistoryPurged {
                cuit: cuit_of(payload)?,
            }),
            "alerts-acknowledged" => Some(Self::AlertsAcknowledged),
            "session-renewed" => Some(Self::SessionRenewed),
            _ => None,
        }
    }

    /// The canonical string name, inverse of [`from_name`].
    ///
    /// [`from_name`]: Self::from_name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ComplianceCheckCompleted { .. } => "compliance-check-completed",
            Self::ContributorUpdated { .. } => "contributor-updated",
            Self::ContributorCreated => "contributor-created",
            Self::ComplianceHistoryPurged { .. } => "compliance-history-purged",
            Self::AlertsAcknowledged => "alerts-acknowledged",
            Self::SessionRenewed => "session-renewed",
        }
    }
}

/// Outcome of fanning one pattern out across every cache context.
///
/// Page-side counts are exact. The worker count is `None` when the
/// acknowledgement timed out: the worker may or may not have purged, and
/// the coordinator does not retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationResult {
    /// The pattern that was applied
    pub pattern: String,
    /// Entries removed from the memory tier
    pub memory_cleared: u64,
    /// Entries removed from the session tier
    pub session_cleared: u64,
    /// Entries removed from the local (persisted) tier
    pub local_cleared: u64,
    /// Entries removed from the worker store, if acknowledged in time
    pub worker_cleared: Option<u64>,
    /// When the fan-out completed
    pub timestamp: DateTime<Utc>,
}

impl InvalidationResult {
    /// Total confirmed evictions across all contexts.
    pub fn total_cleared(&self) -> u64 {
        self.memory_cleared
            + self.session_cleared
            + self.local_cleared
            + self.worker_cleared.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cuit() -> Cuit {
        Cuit::from_prefix([2, 0, 1, 2, 3, 4, 5, 6, 7, 8])
    }

    #[test]
    fn test_compliance_patterns_include_cuit() {
        let event = BusinessEvent::ComplianceCheckCompleted { cuit: test_cuit() };
        let patterns = event.patterns();
        assert_eq!(patterns[0], "compliance_20-12345678-6");
        assert!(patterns.contains(&"compliance_dashboard".to_string()));
    }

    #[test]
    fn test_from_name_round_trip() {
        let payload = serde_json::json!({ "cuit": "20-12345678-6" });
        for name in [
            "compliance-check-completed",
            "contributor-updated",
            "contributor-created",
            "compliance-history-purged",
            "alerts-acknowledged",
            "session-renewed",
        ] {
            let event = BusinessEvent::from_name(name, &payload)
                .unwrap_or_else(|| panic!("{name} should resolve"));
            assert_eq!(event.name(), name);
        }
    }

    #[test]
    fn test_from_name_unknown() {
        let payload = serde_json::json!({});
        assert_eq!(BusinessEvent::from_name("ocr-finished", &payload), None);
    }

    #[test]
    fn test_from_name_missing_cuit() {
        let payload = serde_json::json!({});
        assert_eq!(
            BusinessEvent::from_name("contributor-updated", &payload),
            None
        );
    }

    #[test]
    fn test_serde_tagged_representation() {
        let event = BusinessEvent::ContributorUpdated { cuit: test_cuit() };
        let json = serde_json::to_value(&event).expect("serialize should succeed");
        assert_eq!(json["type"], "ContributorUpdated");
        assert_eq!(json["cuit"], "20-12345678-6");
    }

    #[test]
    fn test_total_cleared_with_unknown_worker() {
        let result = InvalidationResult {
            pattern: "compliance_".into(),
            memory_cleared: 2,
            session_cleared: 1,
            local_cleared: 0,
            worker_cleared: None,
            timestamp: Utc::now(),
        };
        assert_eq!(result.total_cleared(), 3);
    }
}
