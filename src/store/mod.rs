//! Durable record store.
//!
//! The store owns the canonical collections of one key in a [`Medium`].
//! Every operation re-reads the medium, so stores in different execution
//! contexts that share a medium see each other's writes. There is no locking
//! between load and save: interleaved writers resolve last-writer-wins per
//! top-level array.
//!
//! Nothing here panics or returns `Err` to callers. Outcomes are reported
//! through [`SaveOutcome`] and [`WriteOutcome`] instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, Bus};
use crate::config::StoreConfig;
use crate::model::{
    PaymentStatus, PendingPayment, PendingPaymentPatch, Transaction, TransactionStatus,
    UserRecord,
};
use crate::sync::SyncEventType;

mod collection;
pub use collection::{Collection, CollectionPatch};

mod error;
pub use error::{MediumError, StoreError};

pub mod medium;
pub use medium::{FileMedium, MemoryMedium, Medium};

/// What happened to a save.
#[derive(Debug)]
pub enum SaveOutcome {
    Committed,
    /// The medium was full; old transactions were evicted and the retry succeeded.
    CommittedAfterEviction { evicted: usize },
    /// Nothing was written.
    Dropped { reason: StoreError },
}

impl SaveOutcome {
    pub fn is_committed(&self) -> bool {
        !matches!(self, SaveOutcome::Dropped { .. })
    }
}

/// What happened to a single-record mutation.
#[derive(Debug)]
pub enum WriteOutcome {
    Inserted(SaveOutcome),
    Updated(SaveOutcome),
    /// The identifier already exists; nothing was written.
    Duplicate,
    /// The record to update does not exist; nothing was written.
    NotFound,
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        match self {
            WriteOutcome::Inserted(save) | WriteOutcome::Updated(save) => save.is_committed(),
            WriteOutcome::Duplicate | WriteOutcome::NotFound => false,
        }
    }
}

/// The durable store for transactions, pending payments and users.
pub struct DurableStore {
    medium: Arc<dyn Medium>,
    broadcaster: Broadcaster,
    config: StoreConfig,
}

/// Public API
impl DurableStore {
    pub fn new(medium: Arc<dyn Medium>, bus: Arc<dyn Bus>, config: StoreConfig) -> Self {
        Self {
            medium,
            broadcaster: Broadcaster::new(bus),
            config,
        }
    }

    /// Read the current collection. Missing or corrupt data yields an empty one.
    pub fn load(&self) -> Collection {
        match self.medium.read(&self.config.key) {
            Ok(Some(raw)) => Collection::decode(&raw).unwrap_or_else(|| {
                warn!(key = %self.config.key, "stored collection is corrupt, starting empty");
                self.empty()
            }),
            Ok(None) => self.empty(),
            Err(e) => {
                warn!(key = %self.config.key, reason = %e, "failed to read collection");
                self.empty()
            }
        }
    }

    /// Merge `patch` into the stored collection and write it back.
    ///
    /// A full medium triggers one eviction of old transactions and one retry.
    pub fn save(&self, patch: CollectionPatch) -> SaveOutcome {
        let mut collection = self.load();
        collection.merge(patch);
        collection.last_updated = Some(Utc::now());
        collection.version = self.config.version.clone();

        match self.write(&collection) {
            Ok(()) => {
                debug!(key = %self.config.key, "collection saved");
                SaveOutcome::Committed
            }
            Err(e) if e.is_quota() => self.evict_and_retry(collection, e),
            Err(e) => {
                error!(key = %self.config.key, reason = %e, "save dropped");
                SaveOutcome::Dropped { reason: e }
            }
        }
    }

    /// Insert a transaction unless its identifier is already stored.
    pub fn add_transaction(&self, transaction: Transaction) -> WriteOutcome {
        let mut transactions = self.load().transactions;
        if transactions.iter().any(|t| t.id == transaction.id) {
            info!(id = %transaction.id, "transaction skipped: duplicate id");
            return WriteOutcome::Duplicate;
        }

        transactions.push(transaction.clone());
        let outcome = self.save(CollectionPatch::transactions(transactions));
        self.announce(&outcome, SyncEventType::TransactionAdded, &transaction);
        WriteOutcome::Inserted(outcome)
    }

    /// Move a stored transaction to `status`, stamping the update time.
    pub fn update_transaction_status(&self, id: &str, status: TransactionStatus) -> WriteOutcome {
        let mut transactions = self.load().transactions;
        let Some(transaction) = transactions.iter_mut().find(|t| t.id == id) else {
            info!(id, "transaction update skipped: not found");
            return WriteOutcome::NotFound;
        };

        let now = Utc::now();
        transaction.status = status;
        transaction.updated_at = Some(now);
        if status == TransactionStatus::Completed {
            transaction.completed_at = Some(now);
        }
        let updated = transaction.clone();

        let outcome = self.save(CollectionPatch::transactions(transactions));
        self.announce(&outcome, SyncEventType::TransactionUpdated, &updated);
        WriteOutcome::Updated(outcome)
    }

    /// Insert a pending payment unless its identifier is already stored.
    pub fn add_pending_payment(&self, payment: PendingPayment) -> WriteOutcome {
        let mut payments = self.load().pending_payments;
        if payments.iter().any(|p| p.id == payment.id) {
            info!(id = %payment.id, "pending payment skipped: duplicate id");
            return WriteOutcome::Duplicate;
        }

        payments.push(payment.clone());
        let outcome = self.save(CollectionPatch::pending_payments(payments));
        self.announce(&outcome, SyncEventType::PendingPaymentAdded, &payment);
        WriteOutcome::Inserted(outcome)
    }

    pub fn update_pending_payment(&self, id: &str, patch: PendingPaymentPatch) -> WriteOutcome {
        let mut payments = self.load().pending_payments;
        let Some(payment) = payments.iter_mut().find(|p| p.id == id) else {
            info!(id, "pending payment update skipped: not found");
            return WriteOutcome::NotFound;
        };

        patch.apply_to(payment);
        let updated = payment.clone();

        let outcome = self.save(CollectionPatch::pending_payments(payments));
        self.announce(&outcome, SyncEventType::PendingPaymentUpdated, &updated);
        WriteOutcome::Updated(outcome)
    }

    /// Insert the user, or replace the stored user with the same identifier.
    pub fn add_or_update_user(&self, user: UserRecord) -> WriteOutcome {
        let mut users = self.load().users;
        let existing = users.iter_mut().find(|u| u.id == user.id);
        let inserted = existing.is_none();
        match existing {
            Some(slot) => *slot = user.clone(),
            None => users.push(user.clone()),
        }

        let outcome = self.save(CollectionPatch::users(users));
        self.announce(&outcome, SyncEventType::UserUpdated, &user);
        if inserted {
            WriteOutcome::Inserted(outcome)
        } else {
            WriteOutcome::Updated(outcome)
        }
    }

    /// All transactions, most recent first.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut transactions = self.load().transactions;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions
    }

    pub fn transactions_for_user(&self, user_id: &str) -> Vec<Transaction> {
        let mut transactions = self.transactions();
        transactions.retain(|t| t.user_id == user_id);
        transactions
    }

    /// All pending payments, most recently submitted first.
    pub fn pending_payments(&self) -> Vec<PendingPayment> {
        let mut payments = self.load().pending_payments;
        payments.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        payments
    }

    pub fn pending_payments_with_status(&self, status: PaymentStatus) -> Vec<PendingPayment> {
        let mut payments = self.pending_payments();
        payments.retain(|p| p.status == status);
        payments
    }

    /// All users, most recently registered first; users without a date go last.
    pub fn users(&self) -> Vec<UserRecord> {
        let mut users = self.load().users;
        users.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        users
    }

    pub fn user(&self, id: &str) -> Option<UserRecord> {
        self.load().users.into_iter().find(|u| u.id == id)
    }

    /// Remove the stored collection entirely.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.medium.remove(&self.config.key)?;
        info!(key = %self.config.key, "collection cleared");
        Ok(())
    }
}

/// Private API
impl DurableStore {
    fn empty(&self) -> Collection {
        Collection {
            version: self.config.version.clone(),
            ..Default::default()
        }
    }

    fn write(&self, collection: &Collection) -> Result<(), StoreError> {
        let blob = serde_json::to_string(collection)?;
        self.medium.write(&self.config.key, &blob)?;
        Ok(())
    }

    fn evict_and_retry(&self, mut collection: Collection, cause: StoreError) -> SaveOutcome {
        let evicted = match cutoff(self.config.eviction_window()) {
            Some(cutoff) => collection.evict_transactions_before(cutoff),
            None => 0,
        };
        warn!(evicted, reason = %cause, "medium full, evicted old transactions");

        match self.write(&collection) {
            Ok(()) => SaveOutcome::CommittedAfterEviction { evicted },
            Err(e) => {
                error!(key = %self.config.key, reason = %e, "save dropped after eviction");
                SaveOutcome::Dropped { reason: e }
            }
        }
    }

    /// Announce a committed mutation on the bus.
    fn announce<T: Serialize>(&self, outcome: &SaveOutcome, event_type: SyncEventType, record: &T) {
        if !outcome.is_committed() {
            return;
        }
        match serde_json::to_value(record) {
            Ok(data) => self.broadcaster.announce(event_type, data),
            Err(e) => warn!(%event_type, reason = %e, "failed to encode change notice"),
        }
    }
}

fn cutoff(window: Duration) -> Option<DateTime<Utc>> {
    let window = TimeDelta::from_std(window).ok()?;
    Utc::now().checked_sub_signed(window)
}
