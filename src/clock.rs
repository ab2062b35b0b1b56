//! Clock and ID utilities shared by the scheduler, accounting, and the
//! mock upstream's enforcer.

use chrono::{NaiveTime, Utc};

/// Seconds since the Unix epoch, as a float — the unit the admission script
/// and sliding-window scores operate in.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Today's UTC calendar date as `YYYY-MM-DD`, the key suffix for the daily
/// request/token counters.
pub fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Seconds remaining until the next UTC midnight — the TTL daily counters
/// are stamped with on first write.
pub fn seconds_until_utc_midnight() -> i64 {
    let now = Utc::now();
    let midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc();
    (midnight - now).num_seconds().max(1)
}

/// A fresh unique identifier for sliding-window members.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_until_midnight_is_positive_and_bounded() {
        let secs = seconds_until_utc_midnight();
        assert!(secs > 0);
        assert!(secs <= 86_400);
    }

    #[test]
    fn today_utc_has_expected_shape() {
        let day = today_utc();
        assert_eq!(day.len(), 10);
        assert_eq!(day.as_bytes()[4], b'-');
        assert_eq!(day.as_bytes()[7], b'-');
    }

    #[test]
    fn new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
