//! Live update fan-out for connected viewers
//!
//! Publish/subscribe over per-session unbounded channels. Publishing is
//! fire-and-forget: it never blocks, and a send failure only marks the
//! session for pruning. Nothing is retried or persisted for sessions that
//! connect later.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Subscriber session ID type
pub type SubscriberId = u64;

/// Fan-out hub for live update messages
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber; returns its id and the message stream
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, tx);
        log::debug!("Registered live-update subscriber {}", id);
        (id, rx)
    }

    /// Remove a subscriber (idempotent)
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().unwrap().remove(&id).is_some() {
            log::debug!("Unregistered live-update subscriber {}", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Fan a message out to every current subscriber, best-effort
    ///
    /// Wire shape: `{"event_type": <tag>, "data": <payload>}`. Subscribers
    /// whose channel is gone are dropped from the map.
    pub fn publish(&self, event_type: &str, data: serde_json::Value) {
        let message = serde_json::json!({
            "event_type": event_type,
            "data": data,
        })
        .to_string();

        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|_, tx| tx.send(message.clone()).is_ok());
        let pruned = before - subscribers.len();
        if pruned > 0 {
            log::debug!("Pruned {} dead subscribers", pruned);
        }
        log::debug!(
            "Broadcast '{}' to {} subscribers",
            event_type,
            subscribers.len()
        );
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
