use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::instant::format_instant;
use crate::model::{PendingPayment, RecordKind, Transaction, UserRecord};
use crate::validate::{sanitize, validate_record};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: invalid transaction: {}", .errors.join("; "))]
    Invalid { line: usize, errors: Vec<String> },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputRow {
    id: Option<String>,
    user_id: Option<String>,
    r#type: Option<String>,
    status: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    fee: Option<f64>,
    method: Option<String>,
    description: Option<String>,
    created_at: Option<String>,
}

impl InputRow {
    /// Empty cells are left out so validation reports them as missing.
    fn into_json(self) -> Value {
        let mut fields = Map::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                fields.insert(name.to_string(), value);
            }
        };
        put("id", self.id.map(Value::from));
        put("userId", self.user_id.map(Value::from));
        put("type", self.r#type.map(Value::from));
        put("status", self.status.map(Value::from));
        put("amount", self.amount.map(Value::from));
        put("currency", self.currency.map(Value::from));
        put("fee", self.fee.map(Value::from));
        put("method", self.method.map(Value::from));
        put("description", self.description.map(Value::from));
        put("createdAt", self.created_at.map(Value::from));
        Value::Object(fields)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRow<'a> {
    id: &'a str,
    user_id: &'a str,
    r#type: &'static str,
    status: &'static str,
    amount: String,
    currency: &'a str,
    fee: String,
    created_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRow<'a> {
    id: &'a str,
    user_id: &'a str,
    r#type: &'static str,
    status: &'static str,
    amount: String,
    submitted_at: String,
    reviewed_by: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRow<'a> {
    id: &'a str,
    email: &'a str,
    status: &'static str,
    balance: String,
    verified: bool,
}

/// Read transactions from a csv file.
///
/// Every row goes through the same sanitize and validate pass as a sync
/// event; rows that fail it are reported with their line number.
pub fn read_transactions(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Transaction, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let validation = validate_record(RecordKind::Transaction, &sanitize(&row.into_json()));
            if !validation.is_valid {
                return Err(CsvError::Invalid {
                    line,
                    errors: validation.errors,
                });
            }
            serde_json::from_value(validation.sanitized).map_err(|e| CsvError::Invalid {
                line,
                errors: vec![e.to_string()],
            })
        }))
}

/// Write transactions in csv format
pub fn write_transactions<'a>(
    out: impl io::Write,
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    for tx in transactions {
        writer.serialize(TransactionRow {
            id: &tx.id,
            user_id: &tx.user_id,
            r#type: tx.kind.as_str(),
            status: tx.status.as_str(),
            amount: tx.amount.to_string(),
            currency: &tx.currency,
            fee: tx.fee.to_string(),
            created_at: format_instant(tx.created_at),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write pending payments in csv format
pub fn write_payments<'a>(
    out: impl io::Write,
    payments: impl IntoIterator<Item = &'a PendingPayment>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    for payment in payments {
        writer.serialize(PaymentRow {
            id: &payment.id,
            user_id: &payment.user_id,
            r#type: payment.kind.as_str(),
            status: payment.status.as_str(),
            amount: payment.amount.to_string(),
            submitted_at: format_instant(payment.submitted_at),
            reviewed_by: payment.reviewed_by.as_deref().unwrap_or_default(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write users in csv format
pub fn write_users<'a>(
    out: impl io::Write,
    users: impl IntoIterator<Item = &'a UserRecord>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    for user in users {
        writer.serialize(UserRow {
            id: &user.id,
            email: &user.email,
            status: user.status.as_str(),
            balance: user.balance.to_string(),
            verified: user.verified,
        })?;
    }
    writer.flush()?;
    Ok(())
}
