//! Per-cache expiry and size policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Expiry and size limits for one named cache.
///
/// All zero (the default) selects the plain map backend with no expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Time to live of an entry after it was written, in milliseconds.
    #[serde(alias = "ttl")]
    pub ttl_ms: u64,

    /// Maximum time an entry may go unread, in milliseconds.
    #[serde(alias = "maxIdleTime", alias = "max_idle")]
    pub max_idle_ms: u64,

    /// Maximum number of entries; least recently used entries are evicted.
    #[serde(alias = "maxSize")]
    pub max_size: u64,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = duration_millis(ttl);
        self
    }

    pub fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle_ms = duration_millis(idle);
        self
    }

    pub fn with_max_size(mut self, max: u64) -> Self {
        self.max_size = max;
        self
    }

    /// Whether no limit is configured.
    pub fn is_unbounded(&self) -> bool {
        self.ttl_ms == 0 && self.max_idle_ms == 0 && self.max_size == 0
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unbounded() {
        assert!(CachePolicy::default().is_unbounded());
        assert!(!CachePolicy::new().with_max_size(5).is_unbounded());
        assert!(
            !CachePolicy::new()
                .with_max_idle(Duration::from_millis(500))
                .is_unbounded()
        );
    }

    #[test]
    fn test_builder() {
        let policy = CachePolicy::new()
            .with_ttl(Duration::from_secs(60))
            .with_max_idle(Duration::from_secs(30))
            .with_max_size(100);
        assert_eq!(policy.ttl_ms, 60_000);
        assert_eq!(policy.max_idle_ms, 30_000);
        assert_eq!(policy.max_size, 100);
    }

    #[test]
    fn test_accepts_camel_case_fields() {
        let policy: CachePolicy =
            serde_json::from_str(r#"{"ttl": 1440000, "maxIdleTime": 720000}"#).unwrap();
        assert_eq!(policy.ttl_ms, 1_440_000);
        assert_eq!(policy.max_idle_ms, 720_000);
        assert_eq!(policy.max_size, 0);
    }
}
