use async_trait::async_trait;
use chrono::Duration;

use crate::sync::models::{RunStats, RunToken, StartRun, SyncState};
use tributary_common::error::TributaryResult;
use tributary_common::SyncKey;

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Get or create the state row for a key. Never resets an existing row.
    async fn get_or_create(&self, key: &SyncKey) -> TributaryResult<SyncState>;

    /// Read the state row without creating it.
    async fn get(&self, key: &SyncKey) -> TributaryResult<Option<SyncState>>;

    /// Atomically take the run lock if it is free (or its lease has expired):
    /// sets a new token, `last_status = running` and `last_run_started_at = now`.
    /// Returns `Busy` when another run holds the lock.
    async fn try_start_run(&self, key: &SyncKey, lease: Duration) -> TributaryResult<StartRun>;

    /// Advance the cursor and release the lock.
    /// Returns `false` (and changes nothing) when `token` no longer owns the lock.
    async fn complete_run(
        &self,
        key: &SyncKey,
        token: RunToken,
        cursor_to: &str,
        stats: RunStats,
    ) -> TributaryResult<bool>;

    /// Record a failure and release the lock, leaving the cursor untouched.
    /// Returns `false` (and changes nothing) when `token` no longer owns the lock.
    async fn fail_run(&self, key: &SyncKey, token: RunToken, error: &str)
        -> TributaryResult<bool>;

    /// Pause or resume a key. Only the `enabled` column is written.
    async fn set_enabled(&self, key: &SyncKey, enabled: bool) -> TributaryResult<SyncState>;
}
