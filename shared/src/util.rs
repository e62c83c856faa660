use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Add `days` business days (Monday to Friday) to a millisecond timestamp.
///
/// The time of day is preserved. A start on a weekend counts from the next
/// Monday.
pub fn add_business_days(start_millis: i64, days: u32) -> i64 {
    let Some(mut at) = DateTime::<Utc>::from_timestamp_millis(start_millis) else {
        return start_millis;
    };
    let mut remaining = days;
    while remaining > 0 {
        at += Duration::days(1);
        if !matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    at.timestamp_millis()
}
