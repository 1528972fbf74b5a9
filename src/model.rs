//! Core domain records persisted by the store and carried by sync events.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Amount;

/// Record identifier, unique within its collection.
pub type RecordId = String;

/// Owning user identifier.
pub type UserId = String;

/// Declares a closed string enumeration with its wire names.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant,)+
        }

        impl $name {
            /// Every accepted wire name, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(format!(
                        "'{other}' is not one of: {}",
                        Self::NAMES.join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Kind of wallet movement.
    pub enum TransactionType {
        Deposit => "deposit",
        Withdraw => "withdraw",
        Bet => "bet",
        Win => "win",
        Bonus => "bonus",
        Refund => "refund",
        Fee => "fee",
    }
}

string_enum! {
    pub enum TransactionStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Direction of a payment awaiting review.
    pub enum PaymentType {
        Deposit => "deposit",
        Withdraw => "withdraw",
    }
}

string_enum! {
    /// Review lifecycle of a pending payment.
    pub enum PaymentStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Investigating => "investigating",
    }
}

string_enum! {
    pub enum UserStatus {
        Active => "active",
        Suspended => "suspended",
        Closed => "closed",
    }
}

/// A primitive metadata value. Nested structures are not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Null,
}

/// Free-form annotations attached to a transaction.
pub type Metadata = BTreeMap<String, MetaValue>;

fn default_currency() -> String {
    "USD".to_string()
}

/// A wallet transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: RecordId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    /// Signed; withdrawals and bets are usually negative.
    pub amount: Amount,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub fee: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a pending transaction stamped with the current time.
    pub fn new(
        id: impl Into<RecordId>,
        user_id: impl Into<UserId>,
        kind: TransactionType,
        amount: Amount,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            status: TransactionStatus::Pending,
            amount,
            currency: default_currency(),
            fee: Amount::ZERO,
            method: None,
            description: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: None,
            completed_at: None,
        }
    }
}

/// A deposit or withdrawal waiting for back-office review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub id: RecordId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: PaymentType,
    /// Always positive; the direction lives in `kind`.
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<RecordId>,
    pub status: PaymentStatus,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl PendingPayment {
    pub fn new(
        id: impl Into<RecordId>,
        user_id: impl Into<UserId>,
        kind: PaymentType,
        amount: Amount,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            amount,
            transaction_id: None,
            status: PaymentStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            notes: None,
            rejection_reason: None,
        }
    }
}

/// Fields a reviewer may change on a pending payment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPaymentPatch {
    pub status: Option<PaymentStatus>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
}

impl PendingPaymentPatch {
    pub(crate) fn apply_to(self, payment: &mut PendingPayment) {
        if let Some(status) = self.status {
            if status != payment.status && self.reviewed_at.is_none() {
                payment.reviewed_at = Some(Utc::now());
            }
            payment.status = status;
        }
        if let Some(at) = self.reviewed_at {
            payment.reviewed_at = Some(at);
        }
        if let Some(by) = self.reviewed_by {
            payment.reviewed_by = Some(by);
        }
        if let Some(notes) = self.notes {
            payment.notes = Some(notes);
        }
        if let Some(reason) = self.rejection_reason {
            payment.rejection_reason = Some(reason);
        }
    }
}

/// A platform user as seen by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub balance: Amount,
    pub status: UserStatus,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            first_name: None,
            last_name: None,
            balance: Amount::ZERO,
            status: UserStatus::Active,
            verified: false,
            registered_at: Some(Utc::now()),
            last_login_at: None,
        }
    }
}

/// The three record shapes the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Transaction,
    PendingPayment,
    User,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Transaction => "transaction",
            RecordKind::PendingPayment => "pendingPayment",
            RecordKind::User => "user",
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" | "transactions" => Ok(RecordKind::Transaction),
            "pendingPayment" | "pending_payment" | "pendingPayments" | "payment" => {
                Ok(RecordKind::PendingPayment)
            }
            "user" | "users" => Ok(RecordKind::User),
            other => Err(format!("unknown record kind '{other}'")),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any persisted record, tagged by its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Transaction(Transaction),
    PendingPayment(PendingPayment),
    User(UserRecord),
}

impl Record {
    /// Decode a record of the given kind from (already sanitized) JSON.
    pub fn from_json(kind: RecordKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            RecordKind::Transaction => Record::Transaction(serde_json::from_value(value)?),
            RecordKind::PendingPayment => Record::PendingPayment(serde_json::from_value(value)?),
            RecordKind::User => Record::User(serde_json::from_value(value)?),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Transaction(t) => &t.id,
            Record::PendingPayment(p) => &p.id,
            Record::User(u) => &u.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Transaction(_) => RecordKind::Transaction,
            Record::PendingPayment(_) => RecordKind::PendingPayment,
            Record::User(_) => RecordKind::User,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transaction_uses_camel_case_wire_names() {
        let tx = Transaction::new("tx-1", "u-1", TransactionType::Bet, Amount::from_cents(-500));
        let value = serde_json::to_value(&tx).unwrap();

        assert_eq!(value["userId"], "u-1");
        assert_eq!(value["type"], "bet");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["amount"], json!(-5.0));
        assert!(value["createdAt"].is_string());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn transaction_defaults_optional_fields() {
        let tx: Transaction = serde_json::from_value(json!({
            "id": "tx-1",
            "userId": "u-1",
            "type": "deposit",
            "status": "completed",
            "amount": 10.129,
        }))
        .unwrap();

        assert_eq!(tx.amount, Amount::from_cents(1013));
        assert_eq!(tx.currency, "USD");
        assert_eq!(tx.fee, Amount::ZERO);
        assert!(tx.updated_at.is_none());
    }

    #[test]
    fn metadata_holds_primitives_only() {
        let meta: Metadata = serde_json::from_value(json!({
            "odds": 2.5,
            "live": true,
            "market": "1x2",
            "note": null,
        }))
        .unwrap();

        assert_eq!(meta["odds"], MetaValue::Number(2.5));
        assert_eq!(meta["live"], MetaValue::Bool(true));
        assert_eq!(meta["market"], MetaValue::Text("1x2".into()));
        assert_eq!(meta["note"], MetaValue::Null);

        let nested = serde_json::from_value::<Metadata>(json!({ "deep": { "a": 1 } }));
        assert!(nested.is_err());
    }

    #[test]
    fn string_enums_parse_and_reject() {
        assert_eq!("win".parse::<TransactionType>(), Ok(TransactionType::Win));
        assert!("jackpot".parse::<TransactionType>().is_err());
        assert_eq!(PaymentStatus::Investigating.to_string(), "investigating");
    }

    #[test]
    fn record_kind_accepts_aliases() {
        assert_eq!(
            "pending_payment".parse::<RecordKind>(),
            Ok(RecordKind::PendingPayment)
        );
        assert_eq!("users".parse::<RecordKind>(), Ok(RecordKind::User));
        assert!("bet_slip".parse::<RecordKind>().is_err());
    }

    #[test]
    fn patch_stamps_review_time_on_status_change() {
        let mut payment =
            PendingPayment::new("p-1", "u-1", PaymentType::Withdraw, Amount::from_cents(2000));
        PendingPaymentPatch {
            status: Some(PaymentStatus::Approved),
            reviewed_by: Some("admin".into()),
            ..Default::default()
        }
        .apply_to(&mut payment);

        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(payment.reviewed_by.as_deref(), Some("admin"));
        assert!(payment.reviewed_at.is_some());
    }

    #[test]
    fn record_from_json_reports_id_and_kind() {
        let record = Record::from_json(
            RecordKind::User,
            json!({ "id": "u-9", "email": "a@b.io", "status": "active" }),
        )
        .unwrap();

        assert_eq!(record.id(), "u-9");
        assert_eq!(record.kind(), RecordKind::User);
    }
}
