//! Small shared helpers.

use std::time::SystemTime;

/// Seconds since the unix epoch.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
