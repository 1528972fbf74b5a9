use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::instant::{encode_instant, is_timestamp_field, looks_like_iso, parse_instant};
use crate::model::{PendingPayment, Transaction, TransactionStatus, UserRecord};

pub(crate) const DEFAULT_VERSION: &str = "1.0";

const METADATA_KEY: &str = "metadata";

/// The canonical persisted state: three collections plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub transactions: Vec<Transaction>,
    pub pending_payments: Vec<PendingPayment>,
    pub users: Vec<UserRecord>,
    pub last_updated: Option<DateTime<Utc>>,
    pub version: String,
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            transactions: Vec::new(),
            pending_payments: Vec::new(),
            users: Vec::new(),
            last_updated: None,
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

/// Replacement arrays for a save; absent arrays are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CollectionPatch {
    pub transactions: Option<Vec<Transaction>>,
    pub pending_payments: Option<Vec<PendingPayment>>,
    pub users: Option<Vec<UserRecord>>,
}

impl CollectionPatch {
    pub fn transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            transactions: Some(transactions),
            ..Default::default()
        }
    }

    pub fn pending_payments(pending_payments: Vec<PendingPayment>) -> Self {
        Self {
            pending_payments: Some(pending_payments),
            ..Default::default()
        }
    }

    pub fn users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Some(users),
            ..Default::default()
        }
    }
}

impl Collection {
    /// Top-level merge: each array present in the patch replaces ours wholesale.
    pub fn merge(&mut self, patch: CollectionPatch) {
        if let Some(transactions) = patch.transactions {
            self.transactions = transactions;
        }
        if let Some(pending_payments) = patch.pending_payments {
            self.pending_payments = pending_payments;
        }
        if let Some(users) = patch.users {
            self.users = users;
        }
    }

    /// Drop transactions created before `cutoff`. Pending transactions always stay.
    pub fn evict_transactions_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.transactions.len();
        self.transactions
            .retain(|t| t.created_at >= cutoff || t.status == TransactionStatus::Pending);
        before - self.transactions.len()
    }

    /// Decode a stored blob, reviving timestamps and skipping bad records.
    ///
    /// Returns `None` when the blob is not a JSON object at all.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut root: Value = serde_json::from_str(raw).ok()?;
        if !root.is_object() {
            return None;
        }
        revive_instants(&mut root);

        Some(Self {
            transactions: decode_records(root.get("transactions"), "transactions"),
            pending_payments: decode_records(root.get("pendingPayments"), "pendingPayments"),
            users: decode_records(root.get("users"), "users"),
            last_updated: root
                .get("lastUpdated")
                .and_then(Value::as_str)
                .and_then(parse_instant),
            version: root
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_VERSION)
                .to_string(),
        })
    }
}

fn decode_records<T: DeserializeOwned>(value: Option<&Value>, collection: &str) -> Vec<T> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection, id = ?item.get("id"), reason = %e, "skipping undecodable record");
                None
            }
        })
        .collect()
}

/// Walk the records and canonicalize ISO-looking strings on timestamp-named fields.
///
/// Anything else is left as stored: a record whose timestamp cannot be read
/// fails to decode and is skipped. Free-form `metadata` maps are not entered.
fn revive_instants(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                match field {
                    Value::String(raw) if is_timestamp_field(key) && looks_like_iso(raw) => {
                        if let Some(at) = parse_instant(raw) {
                            *field = Value::from(encode_instant(at));
                        }
                    }
                    _ if key == METADATA_KEY => {}
                    other => revive_instants(other),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(revive_instants),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{MetaValue, TransactionType};
    use chrono::{TimeDelta, TimeZone, Timelike};
    use serde_json::json;

    fn tx(id: &str, status: TransactionStatus, age_days: i64) -> Transaction {
        let mut t = Transaction::new(id, "u-1", TransactionType::Bet, Amount::from_cents(-100));
        t.status = status;
        t.created_at = Utc::now() - TimeDelta::days(age_days);
        t
    }

    #[test]
    fn merge_replaces_only_present_arrays() {
        let mut collection = Collection {
            transactions: vec![tx("a", TransactionStatus::Completed, 0)],
            users: vec![UserRecord::new("u-1", "a@b.io")],
            ..Default::default()
        };
        collection.merge(CollectionPatch::transactions(vec![
            tx("b", TransactionStatus::Completed, 0),
            tx("c", TransactionStatus::Completed, 0),
        ]));

        let ids: Vec<_> = collection.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
        assert_eq!(collection.users.len(), 1);
    }

    #[test]
    fn eviction_keeps_recent_and_pending() {
        let mut collection = Collection {
            transactions: vec![
                tx("old-done", TransactionStatus::Completed, 30),
                tx("old-failed", TransactionStatus::Failed, 8),
                tx("old-pending", TransactionStatus::Pending, 400),
                tx("fresh", TransactionStatus::Completed, 1),
            ],
            ..Default::default()
        };

        let evicted = collection.evict_transactions_before(Utc::now() - TimeDelta::days(7));
        assert_eq!(evicted, 2);
        let ids: Vec<_> = collection.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["old-pending", "fresh"]);
    }

    #[test]
    fn decode_revives_naive_and_offset_timestamps() {
        let raw = json!({
            "transactions": [{
                "id": "t1", "userId": "u", "type": "win", "status": "completed",
                "amount": 5, "createdAt": "2024-02-01T10:00:00",
                "completedAt": "2024-02-01T12:00:00+02:00",
            }],
            "pendingPayments": [],
            "users": [],
            "lastUpdated": "2024-02-02T00:00:00.000Z",
            "version": "0.9",
        })
        .to_string();

        let collection = Collection::decode(&raw).unwrap();
        let t = &collection.transactions[0];
        assert_eq!(t.created_at, Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap());
        assert_eq!(
            t.completed_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            collection.last_updated,
            Some(Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(collection.version, "0.9");
    }

    #[test]
    fn decode_skips_records_with_unreadable_timestamps_or_bad_fields() {
        let raw = json!({
            "users": [
                { "id": "u1", "email": "a@b.io", "status": "active", "lastLoginAt": "soon" },
                { "id": "u2", "email": "c@d.io", "status": "banned" },
                { "id": "u3", "email": "e@f.io", "status": "active", "lastLoginAt": null },
            ],
        })
        .to_string();

        let collection = Collection::decode(&raw).unwrap();
        assert_eq!(collection.users.len(), 1);
        assert_eq!(collection.users[0].id, "u3");
        assert!(collection.users[0].last_login_at.is_none());
        assert!(collection.transactions.is_empty());
        assert_eq!(collection.version, DEFAULT_VERSION);
    }

    #[test]
    fn decode_leaves_metadata_strings_alone() {
        let raw = json!({
            "transactions": [{
                "id": "t1", "userId": "u", "type": "bet", "status": "pending",
                "amount": -2, "createdAt": "2024-02-01T10:00:00",
                "metadata": {
                    "kickoffAt": "TBD",
                    "matchDate": "Sat 12 Oct",
                    "settledAt": "2024-02-01T10:00:00",
                },
            }],
        })
        .to_string();

        let collection = Collection::decode(&raw).unwrap();
        let meta = &collection.transactions[0].metadata;
        assert_eq!(meta["kickoffAt"], MetaValue::Text("TBD".into()));
        assert_eq!(meta["matchDate"], MetaValue::Text("Sat 12 Oct".into()));
        assert_eq!(meta["settledAt"], MetaValue::Text("2024-02-01T10:00:00".into()));
    }

    #[test]
    fn decode_keeps_sub_millisecond_precision() {
        let mut t = tx("t1", TransactionStatus::Completed, 0);
        t.created_at = Utc
            .with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let stored = Collection {
            transactions: vec![t.clone()],
            ..Default::default()
        };

        let raw = serde_json::to_string(&stored).unwrap();
        let collection = Collection::decode(&raw).unwrap();
        assert_eq!(collection.transactions, vec![t]);
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(Collection::decode("not json").is_none());
        assert!(Collection::decode("[1,2]").is_none());
    }
}
