use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::sync::models::{RunLease, RunStats, RunStatus, RunToken, StartRun, SyncState};
use crate::sync::repositories::SyncStateRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

/// Process-local state store.
///
/// Every operation runs under one mutex, which gives the same compare-and-set
/// guarantees as the conditional updates of the Postgres store. Suitable for
/// tests and single-process deployments without durability needs.
#[derive(Default)]
pub struct InMemorySyncStateRepository {
    states: Mutex<HashMap<SyncKey, SyncState>>,
}

impl InMemorySyncStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TributaryResult<MutexGuard<'_, HashMap<SyncKey, SyncState>>> {
        self.states
            .lock()
            .map_err(|_| TributaryError::Internal("sync state store mutex poisoned".to_owned()))
    }

    /// Replace a row wholesale. Test fixtures use this to seed cursors.
    pub fn insert(&self, state: SyncState) -> TributaryResult<()> {
        self.lock()?.insert(state.key(), state);
        Ok(())
    }

    pub fn snapshot(&self) -> TributaryResult<Vec<SyncState>> {
        let mut states: Vec<SyncState> = self.lock()?.values().cloned().collect();
        states.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(states)
    }
}

#[async_trait]
impl SyncStateRepository for InMemorySyncStateRepository {
    async fn get_or_create(&self, key: &SyncKey) -> TributaryResult<SyncState> {
        let mut states = self.lock()?;
        let state = states
            .entry(key.clone())
            .or_insert_with(|| SyncState::new(key, Utc::now()));
        Ok(state.clone())
    }

    async fn get(&self, key: &SyncKey) -> TributaryResult<Option<SyncState>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn try_start_run(&self, key: &SyncKey, lease: Duration) -> TributaryResult<StartRun> {
        let now = Utc::now();
        let mut states = self.lock()?;
        let state = states
            .entry(key.clone())
            .or_insert_with(|| SyncState::new(key, now));

        if state.is_locked(now) {
            return Ok(StartRun::Busy);
        }

        let token = RunToken::generate();
        state.run_lock_token = Some(token.0);
        state.run_lock_expires_at = Some(now + lease);
        state.last_status = Some(RunStatus::Running);
        state.last_run_started_at = Some(now);
        state.updated_at = now;

        Ok(StartRun::Started(RunLease {
            token,
            state: state.clone(),
        }))
    }

    async fn complete_run(
        &self,
        key: &SyncKey,
        token: RunToken,
        cursor_to: &str,
        stats: RunStats,
    ) -> TributaryResult<bool> {
        let now = Utc::now();
        let mut states = self.lock()?;
        let Some(state) = states
            .get_mut(key)
            .filter(|s| s.run_lock_token == Some(token.0))
        else {
            tracing::warn!(
                key = %key,
                token = %token,
                "complete_run ignored: token no longer owns the run lock"
            );
            return Ok(false);
        };

        state.cursor_value = Some(cursor_to.to_owned());
        state.last_status = Some(RunStatus::Ok);
        state.last_error = None;
        state.last_run_finished_at = Some(now);
        state.items_fetched = i64::try_from(stats.items_fetched).unwrap_or(i64::MAX);
        state.items_stored = i64::try_from(stats.items_stored).unwrap_or(i64::MAX);
        state.run_lock_token = None;
        state.run_lock_expires_at = None;
        state.updated_at = now;
        Ok(true)
    }

    async fn fail_run(
        &self,
        key: &SyncKey,
        token: RunToken,
        error: &str,
    ) -> TributaryResult<bool> {
        let now = Utc::now();
        let mut states = self.lock()?;
        let Some(state) = states
            .get_mut(key)
            .filter(|s| s.run_lock_token == Some(token.0))
        else {
            tracing::warn!(
                key = %key,
                token = %token,
                "fail_run ignored: token no longer owns the run lock"
            );
            return Ok(false);
        };

        state.last_status = Some(RunStatus::Error);
        state.last_error = Some(error.to_owned());
        state.last_run_finished_at = Some(now);
        state.run_lock_token = None;
        state.run_lock_expires_at = None;
        state.updated_at = now;
        Ok(true)
    }

    async fn set_enabled(&self, key: &SyncKey, enabled: bool) -> TributaryResult<SyncState> {
        let now = Utc::now();
        let mut states = self.lock()?;
        let state = states
            .entry(key.clone())
            .or_insert_with(|| SyncState::new(key, now));
        state.enabled = enabled;
        state.updated_at = now;
        Ok(state.clone())
    }
}
