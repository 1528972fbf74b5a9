//! Record validation and sanitization.
//!
//! Validation never fails outright: every call returns a [`Validation`] with
//! the collected errors and warnings plus a normalized copy of the input.
//! Monetary fields are rounded to cents and timestamps are canonicalized in
//! that copy whether or not the record is valid.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::amount::{Amount, round_cents};
use crate::instant::{encode_instant, is_timestamp_field, parse_instant};
use crate::model::{
    PaymentStatus, PaymentType, RecordKind, TransactionStatus, TransactionType, UserStatus,
};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// Keys that shadow builtin meta-properties of a payload object.
const RESERVED_KEYS: &[&str] = &["constructor", "prototype", "__proto__"];

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub sanitized: Value,
}

/// Validate `record` against the rule named by `kind`.
///
/// Unknown kinds are accepted with a warning.
pub fn validate(kind: &str, record: &Value) -> Validation {
    match RecordKind::from_str(kind) {
        Ok(kind) => validate_record(kind, record),
        Err(_) => unchecked(kind, record),
    }
}

/// Accept `record` as-is, noting that no rule covers `label`.
pub fn unchecked(label: &str, record: &Value) -> Validation {
    Validation {
        is_valid: true,
        errors: Vec::new(),
        warnings: vec![format!("no validation rule defined for '{label}'")],
        sanitized: record.clone(),
    }
}

pub fn validate_record(kind: RecordKind, record: &Value) -> Validation {
    let Some(fields) = record.as_object() else {
        return Validation {
            is_valid: false,
            errors: vec![format!("{kind} must be a JSON object")],
            warnings: Vec::new(),
            sanitized: record.clone(),
        };
    };

    let mut check = Checker::new(fields.clone());
    match kind {
        RecordKind::Transaction => transaction_rule(&mut check),
        RecordKind::PendingPayment => pending_payment_rule(&mut check),
        RecordKind::User => user_rule(&mut check),
    }
    check.timestamps();
    check.finish()
}

/// Strip keys that start with `__` or shadow meta-properties, recursively.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !key.starts_with("__") && !RESERVED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), sanitize(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn transaction_rule(check: &mut Checker) {
    check.required(&["id", "userId", "type", "status", "amount"]);
    check.strings(&["id", "userId", "currency", "method", "description"]);
    check.one_of::<TransactionType>("type");
    check.one_of::<TransactionStatus>("status");

    if check.money("amount") == Some(0.0) {
        check.warn("transaction amount is zero");
    }
    if check.money("fee").is_none() && !check.fields.contains_key("fee") {
        check.fields.insert("fee".into(), Value::from(0.0));
    }
    if !check.fields.contains_key("currency") {
        check.warn("currency missing, defaulting to USD");
        check.fields.insert("currency".into(), Value::from("USD"));
    }
    check.metadata("metadata");
}

fn pending_payment_rule(check: &mut Checker) {
    check.required(&["id", "userId", "type", "amount", "status"]);
    check.strings(&[
        "id",
        "userId",
        "transactionId",
        "reviewedBy",
        "notes",
        "rejectionReason",
    ]);
    check.one_of::<PaymentType>("type");
    check.one_of::<PaymentStatus>("status");

    if let Some(amount) = check.money("amount") {
        if amount <= 0.0 {
            check.error("pending payment amount must be positive");
        }
    }
}

fn user_rule(check: &mut Checker) {
    check.required(&["id", "email", "status"]);
    check.strings(&["id", "email", "firstName", "lastName"]);
    check.one_of::<UserStatus>("status");

    if let Some(Value::String(email)) = check.fields.get("email") {
        if !EMAIL.is_match(email) {
            let msg = format!("'{email}' is not a valid email address");
            check.error(msg);
        }
    }
    match check.money("balance") {
        Some(balance) if balance < 0.0 => check.error("balance must not be negative"),
        Some(_) => {}
        None if !check.fields.contains_key("balance") => {
            check.fields.insert("balance".into(), Value::from(0.0));
        }
        None => {}
    }
    if let Some(verified) = check.fields.get("verified") {
        if !verified.is_boolean() {
            check.error("'verified' must be a boolean");
        }
    }
}

/// Accumulates findings while normalizing a working copy of the record.
struct Checker {
    fields: Map<String, Value>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Checker {
    fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn required(&mut self, names: &[&str]) {
        for name in names {
            if self.fields.get(*name).is_none_or(Value::is_null) {
                self.error(format!("missing required field '{name}'"));
            }
        }
    }

    fn strings(&mut self, names: &[&str]) {
        for name in names {
            match self.fields.get(*name) {
                None | Some(Value::Null) | Some(Value::String(_)) => {}
                Some(_) => self.error(format!("'{name}' must be a string")),
            }
        }
    }

    /// Check an enumerated field; out-of-set values are errors.
    fn one_of<E: FromStr<Err = String>>(&mut self, name: &str) {
        match self.fields.get(name) {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => {
                if let Err(reason) = raw.parse::<E>() {
                    self.error(format!("invalid {name}: {reason}"));
                }
            }
            Some(_) => self.error(format!("'{name}' must be a string")),
        }
    }

    /// Round a monetary field to cents in place and return the rounded value.
    fn money(&mut self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let rounded = round_cents(n.as_f64().unwrap_or(0.0));
                self.fields.insert(name.to_string(), Value::from(rounded));
                if !Amount::fits(rounded) {
                    self.error(format!("'{name}' is out of range"));
                }
                Some(rounded)
            }
            Some(_) => {
                self.error(format!("'{name}' must be a number"));
                None
            }
        }
    }

    fn metadata(&mut self, name: &str) {
        match self.fields.get(name) {
            None | Some(Value::Null) => {}
            Some(Value::Object(entries)) => {
                let nested: Vec<String> = entries
                    .iter()
                    .filter(|(_, v)| v.is_object() || v.is_array())
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in nested {
                    self.error(format!("{name} entry '{key}' must be a primitive value"));
                }
            }
            Some(_) => self.error(format!("'{name}' must be an object")),
        }
    }

    /// Canonicalize every timestamp-named field; unparseable values are errors.
    fn timestamps(&mut self) {
        let names: Vec<String> = self
            .fields
            .keys()
            .filter(|k| is_timestamp_field(k))
            .cloned()
            .collect();

        for name in names {
            match self.fields.get(&name) {
                None | Some(Value::Null) => {}
                Some(Value::String(raw)) => match parse_instant(raw) {
                    Some(at) => {
                        self.fields.insert(name, Value::from(encode_instant(at)));
                    }
                    None => self.error(format!("'{name}' is not a valid timestamp")),
                },
                Some(_) => self.error(format!("'{name}' must be a timestamp string")),
            }
        }
    }

    fn finish(self) -> Validation {
        Validation {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            sanitized: Value::Object(self.fields),
        }
    }
}
