use serde_json::Value;
use std::time::{Duration, Instant};

/// A versioned cache entry.
///
/// `expires_at = None` marks the entry stale on arrival: optimistic writes
/// land this way so readers see the pending value while it is never served
/// as fresh. Expired entries are not removed in the background; they are
/// dropped on the next `get` and overwritten by the next fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    pub etag: Option<String>,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Entry servable as fresh for `ttl` from now.
    pub fn fresh(data: Value, etag: Option<String>, ttl: Duration) -> Self {
        Self {
            data,
            etag,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    /// Entry that is present but never fresh.
    pub fn stale(data: Value, etag: Option<String>) -> Self {
        Self {
            data,
            etag,
            expires_at: None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() < deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_until_deadline() {
        let entry = CacheEntry::fresh(json!({"a": 1}), None, Duration::from_secs(60));
        assert!(entry.is_fresh());
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let entry = CacheEntry::fresh(json!(1), None, Duration::ZERO);
        assert!(!entry.is_fresh());
    }

    #[test]
    fn stale_marker_never_fresh() {
        let entry = CacheEntry::stale(json!(1), Some("v1".into()));
        assert!(!entry.is_fresh());
        assert_eq!(entry.etag.as_deref(), Some("v1"));
    }

    #[test]
    fn expired_entry_not_fresh() {
        let entry = CacheEntry {
            data: json!(1),
            etag: None,
            expires_at: Some(Instant::now() - Duration::from_secs(120)),
        };
        assert!(!entry.is_fresh());
    }
}
