//! Event delivery to subscribers

use crate::protocol::{EventKind, ProcessEvent, Response};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where lifecycle events go. Delivery is best-effort and never blocks.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, kind: EventKind, events: &[ProcessEvent]);
    fn send_to(&self, subscriber: SubscriberId, kind: EventKind, events: &[ProcessEvent]);
}

/// Receiving ends handed to one connected subscriber.
pub struct Subscription {
    pub id: SubscriberId,
    pub broadcast_rx: broadcast::Receiver<String>,
    pub direct_rx: mpsc::UnboundedReceiver<String>,
}

/// Fans JSON event frames out to every subscriber, or to one of them.
pub struct SubscriberHub {
    broadcast_tx: broadcast::Sender<String>,
    direct: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl SubscriberHub {
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            broadcast_tx,
            direct: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        self.lock_direct().insert(id, direct_tx);
        Subscription {
            id,
            broadcast_rx: self.broadcast_tx.subscribe(),
            direct_rx,
        }
    }

    pub fn unregister(&self, id: SubscriberId) {
        self.lock_direct().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_direct().len()
    }

    fn lock_direct(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::UnboundedSender<String>>> {
        self.direct.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn encode(kind: EventKind, events: &[ProcessEvent]) -> Option<String> {
        let frame = Response::Event { event: kind, data: events.to_vec() };
        match serde_json::to_string(&frame) {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to encode {} event: {}", kind, e);
                None
            }
        }
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventSink for SubscriberHub {
    fn broadcast(&self, kind: EventKind, events: &[ProcessEvent]) {
        if let Some(json) = Self::encode(kind, events) {
            // No receivers is fine
            let _ = self.broadcast_tx.send(json);
        }
    }

    fn send_to(&self, subscriber: SubscriberId, kind: EventKind, events: &[ProcessEvent]) {
        let Some(json) = Self::encode(kind, events) else { return };
        match self.lock_direct().get(&subscriber) {
            Some(tx) => {
                let _ = tx.send(json);
            }
            None => debug!("Dropping {} for unknown subscriber {}", kind, subscriber),
        }
    }
}
