use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cancel-all signal driven by navigation events.
///
/// Every request races its guard token against the transport; a
/// `navigated()` call cancels everything outstanding and arms a fresh
/// token, so requests started afterwards are unaffected.
#[derive(Clone, Default)]
pub struct NavigationSignal {
    current: Arc<Mutex<CancellationToken>>,
}

impl NavigationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token guarding requests started now.
    pub fn guard(&self) -> CancellationToken {
        self.current.lock().clone()
    }

    /// Navigation started: cancel all outstanding requests.
    pub fn navigated(&self) {
        let mut current = self.current.lock();
        current.cancel();
        *current = CancellationToken::new();
        tracing::debug!("navigation started, outstanding requests cancelled");
    }
}
