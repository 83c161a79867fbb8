use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::{ApiError, ApiResult};

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp and returns midnight UTC of
/// the calendar date it names. A timestamp keeps its own calendar date, so
/// `2026-01-31T23:30:00+06:00` is Jan 31, not Jan 31 17:30 UTC.
pub fn normalize_to_utc_midnight(raw: &str) -> ApiResult<DateTime<Utc>> {
    let raw = raw.trim();
    let date = if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        d
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.date_naive()
    } else {
        return Err(ApiError::validation(format!(
            "Invalid date '{raw}', expected YYYY-MM-DD or an ISO-8601 timestamp"
        )));
    };
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

pub fn validate_period(month: u8, year: u16) -> ApiResult<()> {
    if !(1..=12).contains(&month) {
        return Err(ApiError::validation("Month must be between 1 and 12"));
    }
    if !(2000..=2100).contains(&year) {
        return Err(ApiError::validation("Year must be between 2000 and 2100"));
    }
    Ok(())
}
