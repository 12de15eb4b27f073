use chrono::{NaiveDate, TimeZone, Utc};

/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Today's UTC calendar day
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Half-open `[start, end)` millisecond bounds of a UTC calendar day
pub fn day_bounds_millis(day: NaiveDate) -> (i64, i64) {
    let start = Utc
        .from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
        .timestamp_millis();
    (start, start + 86_400_000)
}

/// UTC calendar day containing a millisecond timestamp
pub fn day_of_millis(ts: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp_millis(ts).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_bounds() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let (start, end) = day_bounds_millis(day);
        assert_eq!(end - start, 86_400_000);
        assert_eq!(day_of_millis(start), Some(day));
        assert_eq!(day_of_millis(end - 1), Some(day));
        assert_eq!(day_of_millis(end), day.succ_opt());
    }
}
