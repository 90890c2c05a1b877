//! Best-effort fan-out of dashboard updates
//!
//! Publishing never blocks and never fails from the caller's point of view:
//! with no subscribers the event is dropped, and a subscriber that falls more
//! than `capacity` events behind skips ahead (it sees `RecvError::Lagged`).

use serde::Serialize;
use tokio::sync::broadcast;

pub const NEW_TRADE: &str = "newTrade";
pub const PROFIT_UPDATE: &str = "profitUpdate";
pub const WELCOME_UPDATE: &str = "welcomeUpdate";
pub const TAG_PROFIT_UPDATE: &str = "tagProfitUpdate";
pub const NEW_WARNING: &str = "newWarning";
pub const TOP_UPDATE: &str = "topUpdate";

/// Named JSON payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Publish-only sink for dashboard events
pub trait EventBroadcaster: Send + Sync {
    fn publish(&self, name: &str, payload: serde_json::Value);
}

/// Serialize `value` and publish it; serialization failures are logged and dropped
pub fn publish_json<T: Serialize + ?Sized>(broadcaster: &dyn EventBroadcaster, name: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(payload) => broadcaster.publish(name, payload),
        Err(e) => log::warn!("⚠️  Failed to serialize {} payload: {}", name, e),
    }
}

/// In-process broadcaster backed by a tokio broadcast channel
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBroadcaster for ChannelBroadcaster {
    fn publish(&self, name: &str, payload: serde_json::Value) {
        // Err only means nobody is listening
        let _ = self.tx.send(BroadcastEvent {
            name: name.to_string(),
            payload,
        });
    }
}
