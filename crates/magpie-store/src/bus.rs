use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Invalidation event fanned out to sibling stores.
///
/// The serde tagging mirrors the wire shape used between execution
/// contexts: `{"type": "invalidate", "keys": [...]}` or
/// `{"type": "clear", "reason": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Invalidate { keys: Vec<String> },
    Clear { reason: Option<String> },
}

/// Envelope carrying the publishing store's id so receivers can skip
/// their own messages instead of echoing them back.
#[derive(Clone, Debug)]
pub struct CacheMessage {
    pub origin: u64,
    pub event: CacheEvent,
}

/// Broadcast channel connecting cache stores that share the same logical
/// cache (e.g. one store per tab of the same application).
///
/// Delivery is best-effort: publishing with no subscribers is not an
/// error, and a slow subscriber may observe lag.
#[derive(Clone)]
pub struct InvalidationBus {
    tx: broadcast::Sender<CacheMessage>,
}

impl InvalidationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, msg: CacheMessage) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheMessage> {
        self.tx.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(64)
    }
}
