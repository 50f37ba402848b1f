//! Wall-clock helpers.
//!
//! The scheduler works in milliseconds since the Unix epoch so that ticks can
//! be driven by synthetic time in tests and by the system clock in production.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Convert a millisecond span into fractional seconds.
#[allow(clippy::cast_precision_loss)]
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Convert fractional seconds into a `Duration`, saturating on overflow and
/// mapping negative or non-finite inputs to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Hour of day (UTC, 0-23) for a millisecond timestamp.
pub const fn hour_of_day(timestamp_ms: u64) -> u8 {
    ((timestamp_ms / 3_600_000) % 24) as u8
}
