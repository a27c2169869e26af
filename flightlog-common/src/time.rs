//! Date and clock-time utilities

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Today's calendar date in local time
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parse an `HH:MM` clock string into (hours, minutes)
///
/// Hours are not capped at 23 so the same parser serves flight durations.
pub fn parse_hhmm(value: &str) -> Option<(u32, u32)> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.is_empty() || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().all(|b| b.is_ascii_digit()) || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if minutes > 59 {
        return None;
    }
    Some((hours, minutes))
}

/// Whether `value` is a valid time of day (`00:00`..`23:59`)
pub fn is_clock_time(value: &str) -> bool {
    matches!(parse_hhmm(value), Some((h, _)) if h < 24 && value.trim().len() == 5)
}

/// Minutes in an `HH:MM` duration; malformed values (including `__:__`) count as zero
pub fn duration_minutes(value: &str) -> i64 {
    parse_hhmm(value)
        .map(|(h, m)| i64::from(h) * 60 + i64::from(m))
        .unwrap_or(0)
}

/// `DDMonYYYY` with an English three-letter month, e.g. `10May2025`
pub fn compact_date(date: NaiveDate) -> String {
    date.format("%d%b%Y").to_string()
}

/// `HH:MM` → `HHMM`; `None` when the value is not a clock time
pub fn compact_clock(value: &str) -> Option<String> {
    if !is_clock_time(value) {
        return None;
    }
    Some(value.trim().replace(':', ""))
}

/// First and one-past-last day of a calendar year
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
    Some((start, end))
}
