use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Naive layouts emitted by the backend's SQL driver. Read as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Offset-bearing layouts that are not strict RFC 3339 (e.g. `+00` suffix).
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Parse a record timestamp. Returns `None` for anything that is not a
/// recognizable date-time; callers decide what an unparseable timestamp means.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for fmt in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

/// Convert an upstream timestamp value into the string form carried on records.
///
/// Strings pass through untouched (even unparseable ones). Numbers are epoch
/// milliseconds. Objects are `{seconds, nanoseconds}` pairs, with or without
/// a leading underscore on the keys.
pub fn normalize_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis).map(to_iso)
        }
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos as u32).map(to_iso)
        }
        _ => None,
    }
}

fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-03-01T10:00:00+05:30").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 4, 30, 0).unwrap());
    }

    #[test]
    fn parses_sql_style_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 10:00:00+00"), Some(expected));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("2024-13-45T99:00:00Z"), None);
    }

    #[test]
    fn epoch_millis_normalize_to_iso() {
        let iso = normalize_timestamp(&json!(1_709_287_200_000i64)).unwrap();
        assert_eq!(iso, "2024-03-01T10:00:00.000Z");
    }

    #[test]
    fn seconds_objects_normalize_to_iso() {
        let iso =
            normalize_timestamp(&json!({"_seconds": 1_709_287_200, "_nanoseconds": 0})).unwrap();
        assert_eq!(iso, "2024-03-01T10:00:00.000Z");
    }

    #[test]
    fn unparseable_strings_are_kept() {
        assert_eq!(normalize_timestamp(&json!("yesterday")).as_deref(), Some("yesterday"));
        assert_eq!(normalize_timestamp(&json!(true)), None);
    }
}
