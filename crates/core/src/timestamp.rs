use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::value::{Document, Value};

/// Record fields holding creation/update times. Restores turn these back into
/// native datetimes.
pub const TIMESTAMP_FIELDS: [&str; 2] = ["createdAt", "updatedAt"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn format_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an ISO-8601 timestamp. Offset-less values are taken as UTC, which is
/// how older exports wrote them.
pub fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Replaces string timestamps with native datetimes. Strings that do not
/// parse are left as they are.
pub fn parse_timestamp_fields(doc: &mut Document) {
    for field in TIMESTAMP_FIELDS {
        let Some(Value::String(raw)) = doc.get(field) else {
            continue;
        };
        if let Some(dt) = parse_iso(raw) {
            doc.insert(field.to_owned(), Value::DateTime(dt));
        }
    }
}

/// Export stamp in local time, e.g. `20240305_101530`.
pub fn export_stamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offset_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_iso("2024-01-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_iso("2024-01-15T12:30:00+02:00"), Some(expected));
        assert_eq!(parse_iso("2024-01-15T10:30:00"), Some(expected));
        assert_eq!(parse_iso("2024-01-15 10:30:00"), Some(expected));
        assert!(parse_iso("2024-01-15T10:30:00.123456").is_some());
        assert!(parse_iso("yesterday").is_none());
    }

    #[test]
    fn malformed_timestamps_pass_through() {
        let mut doc = Document::new();
        doc.insert("createdAt".into(), Value::String("not-a-date".into()));
        doc.insert("updatedAt".into(), Value::String("2024-01-15T10:30:00Z".into()));
        doc.insert("publishedAt".into(), Value::String("2024-01-15T10:30:00Z".into()));

        parse_timestamp_fields(&mut doc);

        assert_eq!(doc["createdAt"], Value::String("not-a-date".into()));
        assert!(matches!(doc["updatedAt"], Value::DateTime(_)));
        assert!(matches!(doc["publishedAt"], Value::String(_)));
    }

    #[test]
    fn export_stamp_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap();
        assert_eq!(export_stamp(now), "20240305_090701");
    }
}
