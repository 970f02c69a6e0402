//! Sync events: state transitions of the session and data layer, published
//! on a broadcast channel so handlers and tests can observe them. Every event
//! is also logged at debug level.
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    SessionAdopted { user_id: Uuid },
    SessionRefreshed { user_id: Uuid, expires_at: i64 },
    RefreshSkipped { reason: String },
    RefreshFailed { message: String },
    SessionCleared { reason: String },
    SignedOut,
    AdminCacheHit { user_id: Uuid, is_admin: bool },
    AdminChecked { user_id: Uuid, is_admin: bool },
    LoadStarted { loader: &'static str },
    LoadSkipped { loader: &'static str, reason: String },
    LoadSucceeded { loader: &'static str, count: usize },
    LoadRetryScheduled { loader: &'static str, attempt: u32, delay_ms: u64 },
    LoadFailed { loader: &'static str, message: String },
    ReadStatusChanged { post_id: Uuid, read: bool },
    ReadStatusRolledBack { post_id: Uuid, message: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        debug!(?event, "sync event");
        // No subscribers is the normal case outside tests.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains every event currently buffered on `rx`.
#[cfg(test)]
pub fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
