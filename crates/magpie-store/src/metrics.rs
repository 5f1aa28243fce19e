use parking_lot::Mutex;
use std::collections::HashMap;

pub const CACHE_HITS: &str = "cache_hits";
pub const CACHE_MISSES: &str = "cache_misses";
pub const ETAG_304: &str = "etag_304";
pub const OPTIMISTIC_SUCCESS: &str = "optimistic_success";
pub const ROLLBACK: &str = "rollback";

/// Named counters for the data layer.
///
/// Counters are process-local and readable (tests assert on them); every
/// increment is also forwarded to the `metrics` facade so a host binary
/// can install an exporter and scrape the same numbers.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, key: &'static str) {
        *self.counters.lock().entry(key).or_insert(0) += 1;
        metrics::counter!(key).increment(1);
    }

    pub fn get(&self, key: &'static str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counters.lock().clone()
    }

    pub fn reset(&self) {
        self.counters.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_reads() {
        let m = Metrics::new();
        assert_eq!(m.get(CACHE_HITS), 0);
        m.inc(CACHE_HITS);
        m.inc(CACHE_HITS);
        m.inc(ROLLBACK);
        assert_eq!(m.get(CACHE_HITS), 2);
        assert_eq!(m.get(ROLLBACK), 1);
        assert_eq!(m.get(ETAG_304), 0);
    }

    #[test]
    fn snapshot_and_reset() {
        let m = Metrics::new();
        m.inc(CACHE_MISSES);
        let snap = m.snapshot();
        assert_eq!(snap.get(CACHE_MISSES), Some(&1));
        m.reset();
        assert_eq!(m.get(CACHE_MISSES), 0);
    }
}
