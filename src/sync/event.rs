use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::RecordKind;

/// Logical type of a change. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncEventType {
    TransactionAdded,
    TransactionUpdated,
    PendingPaymentAdded,
    PendingPaymentUpdated,
    UserUpdated,
    BalanceUpdated,
    Other(String),
}

impl SyncEventType {
    pub fn as_str(&self) -> &str {
        match self {
            SyncEventType::TransactionAdded => "transaction_added",
            SyncEventType::TransactionUpdated => "transaction_updated",
            SyncEventType::PendingPaymentAdded => "pending_payment_added",
            SyncEventType::PendingPaymentUpdated => "pending_payment_updated",
            SyncEventType::UserUpdated => "user_updated",
            SyncEventType::BalanceUpdated => "balance_updated",
            SyncEventType::Other(name) => name,
        }
    }

    /// The validation rule and record shape carried by this type, if any.
    pub fn record_kind(&self) -> Option<RecordKind> {
        match self {
            SyncEventType::TransactionAdded | SyncEventType::TransactionUpdated => {
                Some(RecordKind::Transaction)
            }
            SyncEventType::PendingPaymentAdded | SyncEventType::PendingPaymentUpdated => {
                Some(RecordKind::PendingPayment)
            }
            SyncEventType::UserUpdated => Some(RecordKind::User),
            SyncEventType::BalanceUpdated | SyncEventType::Other(_) => None,
        }
    }
}

impl From<&str> for SyncEventType {
    fn from(name: &str) -> Self {
        match name {
            "transaction_added" => SyncEventType::TransactionAdded,
            "transaction_updated" => SyncEventType::TransactionUpdated,
            "pending_payment_added" => SyncEventType::PendingPaymentAdded,
            "pending_payment_updated" => SyncEventType::PendingPaymentUpdated,
            "user_updated" => SyncEventType::UserUpdated,
            "balance_updated" => SyncEventType::BalanceUpdated,
            other => SyncEventType::Other(other.to_string()),
        }
    }
}

impl From<String> for SyncEventType {
    fn from(name: String) -> Self {
        SyncEventType::from(name.as_str())
    }
}

impl From<SyncEventType> for String {
    fn from(event_type: SyncEventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for SyncEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change was first made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// Delivery state of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

/// A change waiting for (or done with) delivery to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    pub user_id: String,
    /// Sanitized and validated payload.
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
    pub status: SyncStatus,
    pub retry_count: u32,
    /// Message of the most recent listener failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncEvent {
    pub(crate) fn new(
        event_type: SyncEventType,
        user_id: String,
        data: Value,
        origin: Origin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            user_id,
            data,
            created_at: Utc::now(),
            origin,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Aggregate delivery counts over the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
    pub pending: usize,
    /// `synced / total`, zero when nothing was submitted.
    pub success_rate: f64,
    /// Events still held in the live queue.
    pub queue_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_names_round_trip() {
        for name in [
            "transaction_added",
            "transaction_updated",
            "pending_payment_added",
            "pending_payment_updated",
            "user_updated",
            "balance_updated",
            "bonus_claimed",
        ] {
            assert_eq!(SyncEventType::from(name).as_str(), name);
        }
        assert_eq!(
            SyncEventType::from("bonus_claimed"),
            SyncEventType::Other("bonus_claimed".into())
        );
    }

    #[test]
    fn event_type_serializes_as_plain_string() {
        let value = serde_json::to_value(SyncEventType::UserUpdated).unwrap();
        assert_eq!(value, json!("user_updated"));
        let parsed: SyncEventType = serde_json::from_value(json!("pending_payment_added")).unwrap();
        assert_eq!(parsed, SyncEventType::PendingPaymentAdded);
    }

    #[test]
    fn record_kinds_per_type() {
        assert_eq!(
            SyncEventType::TransactionUpdated.record_kind(),
            Some(RecordKind::Transaction)
        );
        assert_eq!(SyncEventType::UserUpdated.record_kind(), Some(RecordKind::User));
        assert_eq!(SyncEventType::BalanceUpdated.record_kind(), None);
    }

    #[test]
    fn new_event_is_pending() {
        let event = SyncEvent::new(
            SyncEventType::BalanceUpdated,
            "u-1".into(),
            json!({ "balance": 3.5 }),
            Origin::Remote,
        );
        assert_eq!(event.status, SyncStatus::Pending);
        assert_eq!(event.retry_count, 0);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "balance_updated");
        assert_eq!(value["origin"], "remote");
        assert_eq!(value["retryCount"], 0);
    }
}
