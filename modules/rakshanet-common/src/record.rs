//! Field probing over loosely-shaped upstream records.
//!
//! The backend and the document store disagree on field names (and on
//! whether numbers arrive as numbers or strings). Everything that turns a
//! raw JSON object into a typed record goes through these helpers.

use serde_json::{Map, Value};

use crate::time::normalize_timestamp;
use crate::types::Coordinates;

pub type Record = Map<String, Value>;

pub const LAT_KEYS: &[&str] = &["lat", "latitude"];
pub const LNG_KEYS: &[&str] = &["lng", "longitude"];
pub const TIMESTAMP_KEYS: &[&str] = &["timestamp", "createdAt", "created_at"];
pub const USER_ID_KEYS: &[&str] = &["userId", "user_id", "uid"];

/// First key that holds a number (or a string that parses as one).
pub fn number_field(record: &Record, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// First key that holds a non-empty string. Numbers are stringified so that
/// integer primary keys from SQL rows work as ids.
pub fn string_field(record: &Record, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Normalize `lat`/`lng` or `latitude`/`longitude` into validated coordinates.
pub fn coordinates(record: &Record) -> Option<Coordinates> {
    let lat = number_field(record, LAT_KEYS)?;
    let lng = number_field(record, LNG_KEYS)?;
    Coordinates::new(lat, lng)
}

/// Normalized timestamp string, or empty when the record carries none.
pub fn timestamp(record: &Record) -> String {
    TIMESTAMP_KEYS
        .iter()
        .find_map(|key| record.get(*key).and_then(normalize_timestamp))
        .unwrap_or_default()
}
