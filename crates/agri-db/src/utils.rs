//! Shared utility functions

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Timestamps are stored as fixed-width RFC3339 strings (microsecond
/// precision, `Z` suffix) so that SQL string comparison matches
/// chronological order in `expires_at > ?` filters.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string (RFC3339 format) or return current time
///
/// This helper is used throughout the database layer to handle datetime parsing
/// with a fallback to the current time if parsing fails.
pub fn parse_datetime_or_now(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional stored timestamp, treating unparseable values as absent
pub fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Format a calendar date for storage (`YYYY-MM-DD`)
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored calendar date
pub fn parse_date(s: &str) -> Result<NaiveDate, sqlx::Error> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let fractional = whole + Duration::microseconds(5);

        assert_eq!(format_timestamp(whole), "2024-01-01T12:00:00.000000Z");
        assert_eq!(format_timestamp(fractional), "2024-01-01T12:00:00.000005Z");
        assert!(format_timestamp(whole) < format_timestamp(fractional));
    }

    #[test]
    fn test_parse_datetime_or_now() {
        let valid_time = "2024-01-01T12:00:00Z";
        let parsed = parse_datetime_or_now(valid_time);
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T12:00:00+00:00");

        // Invalid time should return current time (just check it doesn't panic)
        let invalid_time = "invalid";
        let now_before = Utc::now();
        let parsed = parse_datetime_or_now(invalid_time);
        let now_after = Utc::now();
        assert!(parsed >= now_before && parsed <= now_after);
    }

    #[test]
    fn test_date_roundtrip_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(format_date(date), "2024-03-09");
        assert_eq!(parse_date("2024-03-09").unwrap(), date);
        assert!(parse_date("09/03/2024").is_err());
    }

    #[test]
    fn test_parse_optional_datetime() {
        assert!(parse_optional_datetime(None).is_none());
        assert!(parse_optional_datetime(Some("garbage".to_string())).is_none());
        assert!(parse_optional_datetime(Some("2024-01-01T00:00:00.000000Z".to_string())).is_some());
    }
}
