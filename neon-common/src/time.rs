//! Timestamp utilities

use chrono::Utc;

/// Current wall-clock time as Unix epoch seconds
///
/// Used for `last_played_at` ordering in the history table.
pub fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}
