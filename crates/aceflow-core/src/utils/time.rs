//! Time Utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Fractional days elapsed between `then` and `now`, never negative
pub fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - then).num_milliseconds().max(0);
    millis as f64 / 86_400_000.0
}
