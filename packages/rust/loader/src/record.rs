//! Field extraction from raw records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::formats::RawRecord;

pub(crate) const TITLE_FIELDS: &[&str] = &["title", "job_title"];
pub(crate) const COMPANY_FIELDS: &[&str] = &["company", "employer"];
pub(crate) const LOCATION_FIELDS: &[&str] = &["location", "city"];
pub(crate) const TIMESTAMP_FIELDS: &[&str] = &["posted_at", "date"];
pub(crate) const SOURCE_FIELD: &str = "source";

/// First non-empty textual value among `fields`, trimmed.
///
/// Numbers are accepted and rendered as text; other JSON types are ignored.
pub(crate) fn first_text(record: &RawRecord, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match record.get(*field)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Outcome of reading a record's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timestamp {
    Absent,
    Parsed(DateTime<Utc>),
    Unparseable,
}

pub(crate) fn posted_at(record: &RawRecord) -> Timestamp {
    match first_text(record, TIMESTAMP_FIELDS) {
        None => Timestamp::Absent,
        Some(raw) => parse_timestamp(&raw).map_or(Timestamp::Unparseable, Timestamp::Parsed),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (both read as UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn first_text_falls_back_to_alias_fields() {
        let r = record(json!({"title": "  ", "job_title": " Dev Java ", "employer": 12}));
        assert_eq!(first_text(&r, TITLE_FIELDS).as_deref(), Some("Dev Java"));
        assert_eq!(first_text(&r, COMPANY_FIELDS).as_deref(), Some("12"));
        assert_eq!(first_text(&r, LOCATION_FIELDS), None);
    }

    #[test]
    fn timestamp_formats() {
        let expected = "2024-05-01T00:00:00+00:00";
        for raw in ["2024-05-01T00:00:00Z", "2024-05-01 00:00:00", "2024-05-01"] {
            assert_eq!(parse_timestamp(raw).unwrap().to_rfc3339(), expected, "{raw}");
        }
        assert_eq!(
            parse_timestamp("2024-05-01T03:00:00-03:00").unwrap().to_rfc3339(),
            "2024-05-01T06:00:00+00:00"
        );
        assert!(parse_timestamp("ontem").is_none());
    }

    #[test]
    fn posted_at_distinguishes_absent_from_bad() {
        assert_eq!(posted_at(&record(json!({}))), Timestamp::Absent);
        assert_eq!(posted_at(&record(json!({"date": "31/02/2024"}))), Timestamp::Unparseable);
        assert!(matches!(
            posted_at(&record(json!({"posted_at": "2024-01-02"}))),
            Timestamp::Parsed(_)
        ));
    }
}
