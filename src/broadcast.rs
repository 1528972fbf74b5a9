//! Cross-context change announcements.
//!
//! A change is described by a [`ChangeNotice`] and written to a [`Bus`]
//! twice: once on the generic [`GENERIC_CHANNEL`] and once on the channel of
//! its event type, so narrow observers need not filter the firehose.
//!
//! Delivery contract: at-least-once from the observer's point of view (the
//! same change may arrive on several channels and from both the store and
//! the sync engine), no acknowledgement, no ordering across channels.
//! Observers must be idempotent on record identifiers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::sync::SyncEventType;

/// Channel every change is announced on.
pub const GENERIC_CHANNEL: &str = "bet-sync";

/// Channel for in-context delivery of events nobody registered a listener for.
pub const LOCAL_CHANNEL: &str = "bet-sync:local";

const DEFAULT_CAPACITY: usize = 256;

/// Name of the channel dedicated to one event type.
pub fn type_channel(event_type: &SyncEventType) -> String {
    format!("{GENERIC_CHANNEL}:{event_type}")
}

/// The announcement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ChangeNotice {
    pub fn new(event_type: SyncEventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A fire-and-forget publish surface shared by every execution context.
pub trait Bus: Send + Sync {
    fn publish(&self, channel: &str, notice: ChangeNotice);
}

/// In-process bus with one broadcast channel per name, created on first use.
///
/// Receivers only see a notice when they next poll, so a publisher never
/// observes its own notice within the call that produced it.
pub struct LocalBus {
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeNotice>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow receiver may lag before it skips notices.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChangeNotice> {
        self.sender(channel).subscribe()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChangeNotice> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn publish(&self, channel: &str, notice: ChangeNotice) {
        let sender = self.sender(channel);
        if sender.send(notice).is_err() {
            debug!(channel, "no observers attached");
        }
    }
}

/// Writes notices to the generic channel and the type channel.
#[derive(Clone)]
pub struct Broadcaster {
    bus: Arc<dyn Bus>,
}

impl Broadcaster {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub fn announce(&self, event_type: SyncEventType, data: Value) {
        let channel = type_channel(&event_type);
        let notice = ChangeNotice::new(event_type, data);
        debug!(event_type = %notice.event_type, "announcing change");
        self.bus.publish(GENERIC_CHANNEL, notice.clone());
        self.bus.publish(&channel, notice);
    }

    /// Deliver a notice to observers inside this context only.
    pub fn notify_local(&self, notice: ChangeNotice) {
        self.bus.publish(LOCAL_CHANNEL, notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_channel_names() {
        assert_eq!(
            type_channel(&SyncEventType::TransactionAdded),
            "bet-sync:transaction_added"
        );
        assert_eq!(
            type_channel(&SyncEventType::Other("promo_claimed".into())),
            "bet-sync:promo_claimed"
        );
    }

    #[test]
    fn notice_wire_shape() {
        let notice = ChangeNotice::new(SyncEventType::UserUpdated, json!({ "id": "u-1" }));
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["type"], "user_updated");
        assert_eq!(value["data"]["id"], "u-1");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn announce_writes_generic_and_type_channels() {
        let bus = Arc::new(LocalBus::new());
        let mut generic = bus.subscribe(GENERIC_CHANNEL);
        let mut narrow = bus.subscribe("bet-sync:pending_payment_added");
        let mut other = bus.subscribe("bet-sync:user_updated");

        Broadcaster::new(bus.clone())
            .announce(SyncEventType::PendingPaymentAdded, json!({ "id": "p-1" }));

        let a = generic.recv().await.unwrap();
        let b = narrow.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.data["id"], "p-1");
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn publishing_without_observers_is_fine() {
        let bus = LocalBus::new();
        bus.publish("nobody", ChangeNotice::new(SyncEventType::BalanceUpdated, json!({})));
    }
}
