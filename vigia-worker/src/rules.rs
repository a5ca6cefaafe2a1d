//! Strategy rule table: URL prefix -> caching strategy.
//!
//! Rules are consulted in order; the first prefix match wins. URLs that
//! match nothing fall back to network-first with a moderate TTL, which
//! keeps unknown endpoints fresh while still surviving a flaky link.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The four caching strategies the worker dispatches between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    NetworkFirst,
    CacheFirst,
    StaleWhileRevalidate,
    NetworkOnly,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkFirst => "network-first",
            Self::CacheFirst => "cache-first",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
            Self::NetworkOnly => "network-only",
        }
    }
}

/// One URL-prefix rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRule {
    pub prefix: String,
    pub strategy: StrategyKind,
    pub ttl: Duration,
}

impl StrategyRule {
    pub fn new(prefix: impl Into<String>, strategy: StrategyKind, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
            ttl,
        }
    }
}

/// Ordered rule table with a default for unmatched URLs.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<StrategyRule>,
    default: StrategyRule,
}

impl RuleTable {
    pub fn new(rules: Vec<StrategyRule>) -> Self {
        Self {
            rules,
            default: StrategyRule::new(
                "",
                StrategyKind::NetworkFirst,
                Duration::from_secs(5 * 60),
            ),
        }
    }

    pub fn with_default(mut self, default: StrategyRule) -> Self {
        self.default = default;
        self
    }

    /// Resolve the strategy for a URL path. First prefix match wins.
    pub fn resolve(&self, path: &str) -> &StrategyRule {
        self.rules
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .unwrap_or(&self.default)
    }
}

/// The rule table the compliance app ships with.
///
/// Contributor and compliance data tolerate short staleness; the padrón
/// lookup is expensive upstream and changes rarely; session status must
/// never be served from cache.
impl Default for RuleTable {
    fn default() -> Self {
        Self::new(vec![
            StrategyRule::new(
                "/api/session",
                StrategyKind::NetworkOnly,
                Duration::ZERO,
            ),
            StrategyRule::new(
                "/api/compliance",
                StrategyKind::NetworkFirst,
                Duration::from_secs(2 * 60),
            ),
            StrategyRule::new(
                "/api/contributors",
                StrategyKind::StaleWhileRevalidate,
                Duration::from_secs(5 * 60),
            ),
            StrategyRule::new(
                "/api/padron",
                StrategyKind::CacheFirst,
                Duration::from_secs(60 * 60),
            ),
            StrategyRule::new(
                "/assets/",
                StrategyKind::CacheFirst,
                Duration::from_secs(24 * 60 * 60),
            ),
        ])
    }
}
