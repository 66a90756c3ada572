use crate::error::TimestampError;
use chrono::{TimeZone, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns `base_ms` moved by `delta_seconds` (negative looks backward).
pub fn shift(base_ms: i64, delta_seconds: i64) -> i64 {
    base_ms.saturating_add(delta_seconds.saturating_mul(1000))
}

/// Shift `base_ms` (now when absent) forward by `add_secs` or backward by
/// `back_secs`. Exactly one direction must be given.
pub fn generate_timestamp(
    base_ms: Option<i64>,
    add_secs: Option<i64>,
    back_secs: Option<i64>,
) -> Result<i64, TimestampError> {
    let base = base_ms.unwrap_or_else(now_ms);
    match (add_secs, back_secs) {
        (Some(add), None) => Ok(shift(base, add)),
        (None, Some(back)) => Ok(shift(base, -back)),
        (Some(_), Some(_)) => Err(TimestampError::InvalidArguments(
            "choose between add_secs and back_secs, not both",
        )),
        (None, None) => Err(TimestampError::InvalidArguments(
            "one of add_secs or back_secs is required",
        )),
    }
}

pub fn format_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%a, %d %b %Y %H:%M:%S +0000").to_string(),
        None => ms.to_string(),
    }
}
