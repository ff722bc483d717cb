//! Per-SKU notification history and its on-disk representation.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::StateError;
use crate::market::de::{decimal_from_value, string_from_value};

/// SKU → history. Sorted so the serialized form is stable across runs.
pub type NotificationState = BTreeMap<String, NotificationRecord>;

/// What we last told the channel about one SKU.
///
/// Optional fields are `None` when the stored value was missing or could not
/// be parsed; the dedup engine treats such records as needing a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub sku: String,
    pub ask_last_notified: Option<Decimal>,
    pub first_notified_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub notification_count: u32,
}

impl NotificationRecord {
    /// Record for a SKU announced for the first time.
    pub fn first(sku: &str, ask: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            sku: sku.to_string(),
            ask_last_notified: Some(ask),
            first_notified_at: Some(now),
            last_notified_at: Some(now),
            notification_count: 1,
        }
    }

    /// Lenient parse of one stored record. `key` fills in a missing `sku`.
    pub fn from_value(key: &str, value: &Value) -> Self {
        let field = |name: &str| value.get(name);

        Self {
            sku: field("sku")
                .and_then(string_from_value)
                .unwrap_or_else(|| key.to_string()),
            ask_last_notified: field("ask_last_notified").and_then(decimal_from_value),
            first_notified_at: field("first_notified_at")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            last_notified_at: field("last_notified_at")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            notification_count: field("notification_count")
                .and_then(count_from_value)
                .unwrap_or(0),
        }
    }
}

/// Render as `2025-11-23T08:10:00Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 with `Z` or an offset, and naive ISO timestamps as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|n| n.and_utc())
}

fn count_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .and_then(|c| u32::try_from(c).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Field order is alphabetical, matching files written by earlier versions.
#[derive(Serialize)]
struct StoredRecord<'a> {
    #[serde(serialize_with = "ask_as_number", skip_serializing_if = "Option::is_none")]
    ask_last_notified: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_notified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_notified_at: Option<String>,
    notification_count: u32,
    sku: &'a str,
}

impl<'a> From<&'a NotificationRecord> for StoredRecord<'a> {
    fn from(r: &'a NotificationRecord) -> Self {
        Self {
            ask_last_notified: r.ask_last_notified,
            first_notified_at: r.first_notified_at.as_ref().map(format_timestamp),
            last_notified_at: r.last_notified_at.as_ref().map(format_timestamp),
            notification_count: r.notification_count,
            sku: &r.sku,
        }
    }
}

fn ask_as_number<S: Serializer>(ask: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error> {
    match ask.and_then(|a| a.to_f64()) {
        Some(value) => serializer.serialize_f64(value),
        None => serializer.serialize_none(),
    }
}

/// Parse a whole state document.
pub fn parse_state(contents: &str) -> Result<NotificationState, StateError> {
    let value: Value = serde_json::from_str(contents)?;

    let Value::Object(map) = value else {
        return Err(StateError::NotAnObject(json_kind(&value)));
    };

    Ok(map
        .iter()
        .map(|(key, record)| (key.clone(), NotificationRecord::from_value(key, record)))
        .collect())
}

/// Pretty JSON, two-space indent, keys sorted.
pub fn render_state(state: &NotificationState) -> serde_json::Result<String> {
    let stored: BTreeMap<&str, StoredRecord<'_>> = state
        .iter()
        .map(|(key, record)| (key.as_str(), StoredRecord::from(record)))
        .collect();
    serde_json::to_string_pretty(&stored)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
