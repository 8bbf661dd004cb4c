//! Interval gating: whether a key is due for another run.

use chrono::{DateTime, Duration, Utc};

use tributary_db::sync::models::SyncState;

/// The instant gating measures from: the last finish, or the last start when no
/// finish was ever recorded.
pub fn run_anchor(state: &SyncState) -> Option<DateTime<Utc>> {
    state.last_run_finished_at.or(state.last_run_started_at)
}

/// `true` when at least `interval` has elapsed since [`run_anchor`], or the key
/// has never run.
pub fn is_due(state: &SyncState, now: DateTime<Utc>, interval: Duration) -> bool {
    match run_anchor(state) {
        Some(anchor) => now - anchor >= interval,
        None => true,
    }
}
