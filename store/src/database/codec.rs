//! Storage codec
//!
//! Converts between in-memory records (chrono values) and the stored JSON
//! documents, where every timestamp is an ISO-8601 string and calendar days
//! are `YYYY-MM-DD`. Composite keys are assembled and split here as well.
//!
//! Timestamps are always written in UTC with millisecond precision
//! (`2024-03-01T09:30:00.000Z`), so string order equals time order and
//! index range scans over them are meaningful.

use crate::error::{Result, StoreError};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current time at the precision timestamps are stored with, so a freshly
/// stamped record equals its own stored copy.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("Invalid timestamp '{}': {}", value, e)))
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| StoreError::InvalidRecord(format!("Invalid date '{}': {}", value, e)))
}

/// Encode a record as its stored document.
pub fn encode<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Decode a stored document into a record.
pub fn decode<T: DeserializeOwned>(doc: &str) -> Result<T> {
    Ok(serde_json::from_str(doc)?)
}

/// Decode an already-parsed JSON value (legacy import path).
pub fn decode_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Storage key for a `(habitId, date)` pair.
pub fn composite_key(habit_id: &str, date: &NaiveDate) -> String {
    serde_json::json!([habit_id, format_date(date)]).to_string()
}

pub fn split_composite_key(key: &str) -> Result<(String, NaiveDate)> {
    let (habit_id, date): (String, String) = serde_json::from_str(key)
        .map_err(|_| StoreError::InvalidRecord(format!("Malformed composite key: {}", key)))?;
    Ok((habit_id, parse_date(&date)?))
}

/// A value looked up through a secondary index.
///
/// Booleans are stored by SQLite's JSON functions as 0/1, so they
/// collapse into `Integer`.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Text(String),
    Integer(i64),
}

impl IndexValue {
    /// Index value for anything that serializes to a JSON scalar,
    /// e.g. the status enums.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(s) => Ok(IndexValue::Text(s)),
            serde_json::Value::Bool(b) => Ok(IndexValue::from(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(IndexValue::Integer)
                .ok_or_else(|| StoreError::InvalidRecord(format!("Non-integer index value: {}", n))),
            other => Err(StoreError::InvalidRecord(format!(
                "Index values must be scalar, got {}",
                other
            ))),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::Text(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Integer(i64::from(value))
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for IndexValue {
    fn from(value: DateTime<Utc>) -> Self {
        IndexValue::Text(format_timestamp(&value))
    }
}

impl From<NaiveDate> for IndexValue {
    fn from(value: NaiveDate) -> Self {
        IndexValue::Text(format_date(&value))
    }
}

/// Serde adapter for required timestamps.
pub mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional timestamps; pair with `#[serde(default)]`.
pub mod iso8601_option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&super::format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.is_empty() => super::parse_timestamp(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

/// Deserializer for clearable patch fields; pair with `#[serde(default)]`.
///
/// An absent key stays `None` (keep the current value), an explicit `null`
/// becomes `Some(None)` (clear it).
pub mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// [`nullable`] for timestamp fields.
pub mod nullable_iso8601 {
    use chrono::{DateTime, Utc};
    use serde::Deserializer;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<DateTime<Utc>>>, D::Error> {
        super::iso8601_option::deserialize(deserializer).map(Some)
    }
}

/// Serde adapter for `YYYY-MM-DD` calendar days.
pub mod calendar_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}
