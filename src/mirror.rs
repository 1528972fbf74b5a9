//! In-memory view of the collections fed by change notices.
//!
//! A `Mirror` is what an execution context keeps on screen: it starts from
//! the store, then folds in every notice it observes. Notices may arrive
//! more than once and in any order across channels, so applying is an
//! idempotent upsert keyed by record id.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Amount;
use crate::broadcast::ChangeNotice;
use crate::model::{
    PendingPayment, Record, RecordId, RecordKind, Transaction, UserId, UserRecord,
};
use crate::store::DurableStore;
use crate::sync::SyncEventType;
use crate::validate::{sanitize, validate_record};

#[derive(Debug, Default)]
pub struct Mirror {
    transactions: HashMap<RecordId, Transaction>,
    payments: HashMap<RecordId, PendingPayment>,
    users: HashMap<UserId, UserRecord>,
}

/// Public API
impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mirror seeded with everything the store currently holds.
    pub fn from_store(store: &DurableStore) -> Self {
        let mut mirror = Self::new();
        mirror.refresh(store);
        mirror
    }

    /// Consume notices until the stream ends.
    pub async fn run(&mut self, mut stream: impl Stream<Item = ChangeNotice> + Unpin) {
        while let Some(notice) = stream.next().await {
            // stale or malformed notices are logged and skipped
            let _ = self.apply(&notice);
        }
    }

    /// Fold one notice into the view. Returns whether anything changed.
    pub fn apply(&mut self, notice: &ChangeNotice) -> bool {
        if notice.event_type == SyncEventType::BalanceUpdated {
            return self.apply_balance(notice);
        }
        let Some(kind) = notice.event_type.record_kind() else {
            debug!(event_type = %notice.event_type, "no view for notice");
            return false;
        };

        let validation = validate_record(kind, &sanitize(&notice.data));
        if !validation.is_valid {
            warn!(
                event_type = %notice.event_type,
                errors = ?validation.errors,
                "skipped invalid notice"
            );
            return false;
        }
        let record = match Record::from_json(kind, validation.sanitized) {
            Ok(record) => record,
            Err(e) => {
                warn!(event_type = %notice.event_type, reason = %e, "skipped undecodable notice");
                return false;
            }
        };

        let id = record.id().to_string();
        let changed = match record {
            Record::Transaction(t) => upsert(&mut self.transactions, t.id.clone(), t),
            Record::PendingPayment(p) => upsert(&mut self.payments, p.id.clone(), p),
            Record::User(u) => upsert(&mut self.users, u.id.clone(), u),
        };
        Self::log_apply(&notice.event_type, &id, changed);
        changed
    }

    /// Fold one notice in using the store's copy of the record it names.
    ///
    /// The notice only contributes its type and record id, so a stale or
    /// forged payload cannot put anything in the view that the store does
    /// not hold. A record missing from the store is skipped.
    pub fn apply_from(&mut self, store: &DurableStore, notice: &ChangeNotice) -> bool {
        let kind = if notice.event_type == SyncEventType::BalanceUpdated {
            Some(RecordKind::User)
        } else {
            notice.event_type.record_kind()
        };
        let Some(kind) = kind else {
            debug!(event_type = %notice.event_type, "no view for notice");
            return false;
        };
        let id_field = match kind {
            RecordKind::User => notice.data.get("userId").or_else(|| notice.data.get("id")),
            _ => notice.data.get("id"),
        };
        let Some(id) = id_field.and_then(|v| v.as_str()) else {
            warn!(event_type = %notice.event_type, "skipped notice without record id");
            return false;
        };

        let changed = match kind {
            RecordKind::Transaction => store
                .transactions()
                .into_iter()
                .find(|t| t.id == id)
                .map(|t| upsert(&mut self.transactions, t.id.clone(), t)),
            RecordKind::PendingPayment => store
                .pending_payments()
                .into_iter()
                .find(|p| p.id == id)
                .map(|p| upsert(&mut self.payments, p.id.clone(), p)),
            RecordKind::User => store
                .user(id)
                .map(|u| upsert(&mut self.users, u.id.clone(), u)),
        };
        let Some(changed) = changed else {
            debug!(event_type = %notice.event_type, id, "notice names a record the store does not hold");
            return false;
        };
        Self::log_apply(&notice.event_type, id, changed);
        changed
    }

    /// Replace the view with what the store holds now.
    pub fn refresh(&mut self, store: &DurableStore) {
        let collection = store.load();
        self.transactions = collection
            .transactions
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        self.payments = collection
            .pending_payments
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        self.users = collection
            .users
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();
        info!(
            transactions = self.transactions.len(),
            payments = self.payments.len(),
            users = self.users.len(),
            "mirror refreshed"
        );
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn payment(&self, id: &str) -> Option<&PendingPayment> {
        self.payments.get(id)
    }

    pub fn user(&self, id: &str) -> Option<&UserRecord> {
        self.users.get(id)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.transactions.values()
    }

    pub fn payments(&self) -> impl Iterator<Item = &PendingPayment> + '_ {
        self.payments.values()
    }

    pub fn users(&self) -> impl Iterator<Item = &UserRecord> + '_ {
        self.users.values()
    }
}

/// Private API
impl Mirror {
    /// `balance_updated` carries `{ userId | id, balance }` for a known user.
    fn apply_balance(&mut self, notice: &ChangeNotice) -> bool {
        let data = &notice.data;
        let user_id = data
            .get("userId")
            .or_else(|| data.get("id"))
            .and_then(|v| v.as_str());
        let balance = data.get("balance").and_then(|v| v.as_f64());
        let (Some(user_id), Some(balance)) = (user_id, balance) else {
            warn!(event_type = %notice.event_type, "skipped balance notice without user or balance");
            return false;
        };
        let Some(user) = self.users.get_mut(user_id) else {
            debug!(user_id, "balance notice for unknown user");
            return false;
        };

        let balance = Amount::from_float(balance);
        let changed = user.balance != balance;
        user.balance = balance;
        Self::log_apply(&notice.event_type, user_id, changed);
        changed
    }

    fn log_apply(event_type: &SyncEventType, id: &str, changed: bool) {
        if changed {
            info!(%event_type, id, "applied");
        } else {
            debug!(%event_type, id, "skipped duplicate");
        }
    }
}

fn upsert<T: PartialEq>(map: &mut HashMap<String, T>, id: String, record: T) -> bool {
    match map.get(&id) {
        Some(existing) if *existing == record => false,
        _ => {
            map.insert(id, record);
            true
        }
    }
}

/// Adapt a bus receiver into the stream [`Mirror::run`] consumes.
///
/// A lagging receiver skips the notices it missed; call
/// [`Mirror::refresh`] to catch up.
pub fn notice_stream(
    receiver: broadcast::Receiver<ChangeNotice>,
) -> impl Stream<Item = ChangeNotice> + Unpin {
    Box::pin(
        BroadcastStream::new(receiver).filter_map(|item| match item {
            Ok(notice) => Some(notice),
            Err(e) => {
                warn!(reason = %e, "mirror lagged behind the bus");
                None
            }
        }),
    )
}
