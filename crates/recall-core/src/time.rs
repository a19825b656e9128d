//! Wall-clock helper.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::row::Timestamp;

/// Current time in fractional seconds since the Unix epoch.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
