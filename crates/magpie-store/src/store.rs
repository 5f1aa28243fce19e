use crate::bus::{CacheEvent, CacheMessage, InvalidationBus};
use crate::entry::CacheEntry;
use crate::metrics::{Metrics, CACHE_HITS, CACHE_MISSES};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Per-context cache store: versioned entries keyed by explicit strings,
/// plus a side table mapping request URLs to their last known ETag/body.
///
/// The store is unbounded and never sweeps in the background; expired
/// entries are dropped on `get` and overwritten by the next fetch.
/// Sibling stores attached to the same [`InvalidationBus`] receive
/// invalidation/clear events and re-apply them locally without
/// re-broadcasting.
pub struct CacheStore {
    id: u64,
    entries: RwLock<HashMap<String, CacheEntry>>,
    url_etags: RwLock<HashMap<String, String>>,
    url_bodies: RwLock<HashMap<String, Value>>,
    bus: Mutex<Option<InvalidationBus>>,
    metrics: Arc<Metrics>,
}

impl CacheStore {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            entries: RwLock::new(HashMap::new()),
            url_etags: RwLock::new(HashMap::new()),
            url_bodies: RwLock::new(HashMap::new()),
            bus: Mutex::new(None),
            metrics,
        }
    }

    /// Connect this store to a bus and start applying sibling events.
    ///
    /// The listener holds only a weak reference; it exits when the store
    /// is dropped or the bus closes.
    pub fn attach(self: &Arc<Self>, bus: &InvalidationBus) {
        *self.bus.lock() = Some(bus.clone());

        let mut rx = bus.subscribe();
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let Some(store) = store.upgrade() else { break };
                        if msg.origin == store.id {
                            continue;
                        }
                        match msg.event {
                            CacheEvent::Invalidate { keys } => store.invalidate(&keys, false),
                            CacheEvent::Clear { reason } => {
                                store.clear_all(reason.as_deref(), false)
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "invalidation listener lagged, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Fresh lookup. Expired entries are removed and reported absent.
    /// Counts a hit or miss on the metrics collaborator either way.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.write();
        match entries.get(key).cloned() {
            Some(entry) if entry.is_fresh() => {
                self.metrics.inc(CACHE_HITS);
                tracing::trace!(key = %key, "cache HIT");
                Some(entry)
            }
            Some(_) => {
                entries.remove(key);
                self.metrics.inc(CACHE_MISSES);
                tracing::trace!(key = %key, "cache MISS (expired)");
                None
            }
            None => {
                self.metrics.inc(CACHE_MISSES);
                tracing::trace!(key = %key, "cache MISS");
                None
            }
        }
    }

    /// Raw lookup regardless of freshness; no counters. Used to obtain a
    /// revalidation tag from a stale entry and to snapshot state before an
    /// optimistic mutation.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, data: Value, etag: Option<String>, ttl: Duration) {
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry::fresh(data, etag, ttl));
    }

    /// Insert a value that is present but never served as fresh. Readers
    /// observe it via `peek` while a write is pending.
    pub fn set_stale(&self, key: &str, data: Value, etag: Option<String>) {
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry::stale(data, etag));
    }

    /// Remove keys; with `broadcast`, publish the removal to sibling
    /// stores. Receivers re-apply with `broadcast = false`.
    pub fn invalidate(&self, keys: &[String], broadcast: bool) {
        {
            let mut entries = self.entries.write();
            for key in keys {
                entries.remove(key);
            }
        }
        tracing::debug!(keys = ?keys, broadcast, "cache invalidated");
        if broadcast {
            self.publish(CacheEvent::Invalidate {
                keys: keys.to_vec(),
            });
        }
    }

    /// Empty the entry table and the URL side table (logout, tenant
    /// switch).
    pub fn clear_all(&self, reason: Option<&str>, broadcast: bool) {
        self.entries.write().clear();
        self.url_etags.write().clear();
        self.url_bodies.write().clear();
        tracing::info!(reason = reason.unwrap_or("unspecified"), "cache cleared");
        if broadcast {
            self.publish(CacheEvent::Clear {
                reason: reason.map(str::to_string),
            });
        }
    }

    /// Record the last known ETag and/or body for an exact request URL.
    pub fn set_url_meta(&self, url: &str, etag: Option<String>, body: Option<Value>) {
        if let Some(etag) = etag {
            self.url_etags.write().insert(url.to_string(), etag);
        }
        if let Some(body) = body {
            self.url_bodies.write().insert(url.to_string(), body);
        }
    }

    pub fn get_url_etag(&self, url: &str) -> Option<String> {
        self.url_etags.read().get(url).cloned()
    }

    pub fn get_url_body(&self, url: &str) -> Option<Value> {
        self.url_bodies.read().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn publish(&self, event: CacheEvent) {
        match self.bus.lock().as_ref() {
            Some(bus) => bus.publish(CacheMessage {
                origin: self.id,
                event,
            }),
            None => {
                tracing::debug!("no invalidation bus attached, skipping broadcast");
            }
        }
    }
}
