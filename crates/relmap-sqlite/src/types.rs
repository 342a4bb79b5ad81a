//! Conversions between relmap values and SQLite storage classes.
//!
//! SQLite has five storage classes, so richer values are folded on the way
//! in and come back as their storage class. The dialect's `extract_value`
//! turns them back into the column's semantic type.

use relmap_core::Value;
use rusqlite::types::{Value as SqliteValue, ValueRef};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Convert a value into the owned SQLite value bound for it.
///
/// Booleans bind as 0/1, decimals and temporal values as ISO text, UUIDs as
/// 16-byte blobs and JSON as its text form.
pub fn bind_value(value: &Value) -> SqliteValue {
    match value.clone().normalize_temporal() {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(b)),
        Value::TinyInt(v) => SqliteValue::Integer(i64::from(v)),
        Value::SmallInt(v) => SqliteValue::Integer(i64::from(v)),
        Value::Int(v) => SqliteValue::Integer(i64::from(v)),
        Value::BigInt(v) => SqliteValue::Integer(v),
        Value::Float(v) => SqliteValue::Real(f64::from(v)),
        Value::Double(v) => SqliteValue::Real(v),
        Value::Decimal(s) | Value::Text(s) => SqliteValue::Text(s),
        Value::Bytes(b) => SqliteValue::Blob(b),
        v @ Value::Date(_) => temporal_text(&v, |v| {
            v.as_naive_date().map(|d| d.format(DATE_FORMAT).to_string())
        }),
        v @ Value::Time(_) => temporal_text(&v, |v| {
            v.as_naive_time().map(|t| t.format(TIME_FORMAT).to_string())
        }),
        v @ (Value::Timestamp(_) | Value::TimestampTz(_)) => temporal_text(&v, |v| {
            v.as_naive_datetime()
                .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        }),
        Value::Uuid(bytes) => SqliteValue::Blob(bytes.to_vec()),
        Value::Json(json) => SqliteValue::Text(json.to_string()),
    }
}

fn temporal_text(value: &Value, render: impl FnOnce(&Value) -> Option<String>) -> SqliteValue {
    match render(value) {
        Some(text) => SqliteValue::Text(text),
        // Out of chrono's range; keep the raw number rather than failing the bind.
        None => match value {
            Value::Date(days) => SqliteValue::Integer(i64::from(*days)),
            Value::Time(micros) | Value::Timestamp(micros) | Value::TimestampTz(micros) => {
                SqliteValue::Integer(*micros)
            }
            _ => SqliteValue::Null,
        },
    }
}

/// Read a column value in its storage class.
pub fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::BigInt(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}
