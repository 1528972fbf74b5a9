//! Recognizing and parsing serialized instants.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;

/// Field names that hold instants without following the `...At`/`...Date` convention.
const KNOWN_TIMESTAMP_FIELDS: &[&str] = &[
    "timestamp",
    "lastUpdated",
    "lastLogin",
    "submitted",
    "reviewed",
];

static ISO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}").expect("valid regex"));

/// Whether a field name suggests it carries an instant.
pub fn is_timestamp_field(name: &str) -> bool {
    name.contains("Date") || name.contains("At") || KNOWN_TIMESTAMP_FIELDS.contains(&name)
}

/// Whether a string starts like an ISO-8601 date-time.
pub fn looks_like_iso(value: &str) -> bool {
    ISO_PREFIX.is_match(value)
}

/// Parse an ISO-8601-like string. Values without an offset are taken as UTC.
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Lossless wire form for instants; sub-second digits are kept as needed.
pub fn encode_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Display form with millisecond precision, for reports and exports.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
