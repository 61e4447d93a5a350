//! Time utilities for jobmesh
//!
//! Timestamps on the wire are Unix seconds as `f64`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds with sub-second precision.
///
/// A clock before the epoch reads as 0.
///
/// # Examples
/// ```
/// use jm_core::time::unix_now;
///
/// assert!(unix_now() > 0.0);
/// ```
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Current Unix timestamp in whole seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Seconds elapsed since a Unix timestamp, 0 for timestamps in the future.
pub fn elapsed_since(timestamp: f64) -> f64 {
    (unix_now() - timestamp).max(0.0)
}
