use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to parse timestamp '{value}': expected ISO-8601 such as 2024-01-01T00:00:00Z")]
pub struct TimestampError {
    pub value: String,
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 instant.
///
/// Accepts RFC 3339 with an offset, naive date-times (`T` or space separated,
/// interpreted as UTC) and bare dates (midnight UTC).
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimestampError {
        value: value.to_string(),
    })
}

/// Canonical form written to the state file, e.g. `2024-01-01T00:10:00Z`.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
