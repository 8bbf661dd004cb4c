use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};

use crate::sync::models::{RunLease, RunStats, RunStatus, RunToken, StartRun, SyncState};
use crate::sync::repositories::SyncStateRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

const STATE_COLUMNS: &str = "account_id, resource_type, cursor_value, enabled, \
     last_run_started_at, last_run_finished_at, last_status, last_error, \
     run_lock_token, run_lock_expires_at, items_fetched, items_stored, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncStateRepository {
    pool: PgPool,
}

impl PgSyncStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> TributaryResult<SyncState> {
        let last_status = row
            .get::<Option<String>, _>("last_status")
            .map(|s| s.parse::<RunStatus>())
            .transpose()?;

        Ok(SyncState {
            account_id: row.get("account_id"),
            resource_type: row.get("resource_type"),
            cursor_value: row.get("cursor_value"),
            enabled: row.get("enabled"),
            last_run_started_at: row.get("last_run_started_at"),
            last_run_finished_at: row.get("last_run_finished_at"),
            last_status,
            last_error: row.get("last_error"),
            run_lock_token: row.get("run_lock_token"),
            run_lock_expires_at: row.get("run_lock_expires_at"),
            items_fetched: row.get("items_fetched"),
            items_stored: row.get("items_stored"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

fn clamp_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl SyncStateRepository for PgSyncStateRepository {
    async fn get_or_create(&self, key: &SyncKey) -> TributaryResult<SyncState> {
        // The no-op update makes `returning` yield the existing row untouched.
        let sql = format!(
            "insert into sync_states (account_id, resource_type)
             values ($1, $2)
             on conflict (account_id, resource_type) do update
               set account_id = excluded.account_id
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key.account_id)
            .bind(&key.resource_type)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get(&self, key: &SyncKey) -> TributaryResult<Option<SyncState>> {
        let sql = format!(
            "select {STATE_COLUMNS} from sync_states
             where account_id = $1 and resource_type = $2"
        );
        let row = sqlx::query(&sql)
            .bind(key.account_id)
            .bind(&key.resource_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn try_start_run(&self, key: &SyncKey, lease: Duration) -> TributaryResult<StartRun> {
        let now = Utc::now();
        let token = RunToken::generate();

        // Single statement: creates the row if missing, otherwise takes the lock
        // only when it is free or its lease has run out. Concurrent callers are
        // serialised on the row lock and re-check the predicate.
        let sql = format!(
            "insert into sync_states
               (account_id, resource_type, run_lock_token, run_lock_expires_at,
                last_status, last_run_started_at, updated_at)
             values ($1, $2, $3, $4, 'running', $5, $5)
             on conflict (account_id, resource_type) do update set
               run_lock_token = excluded.run_lock_token,
               run_lock_expires_at = excluded.run_lock_expires_at,
               last_status = 'running',
               last_run_started_at = excluded.last_run_started_at,
               updated_at = excluded.updated_at
             where sync_states.run_lock_token is null
                or sync_states.run_lock_expires_at <= excluded.last_run_started_at
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key.account_id)
            .bind(&key.resource_type)
            .bind(token.0)
            .bind(now + lease)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(StartRun::Started(RunLease {
                token,
                state: Self::map_row(r)?,
            })),
            None => Ok(StartRun::Busy),
        }
    }

    async fn complete_run(
        &self,
        key: &SyncKey,
        token: RunToken,
        cursor_to: &str,
        stats: RunStats,
    ) -> TributaryResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "update sync_states
             set cursor_value = $1, last_status = 'ok', last_error = null,
                 last_run_finished_at = $2, items_fetched = $3, items_stored = $4,
                 run_lock_token = null, run_lock_expires_at = null, updated_at = $2
             where account_id = $5 and resource_type = $6 and run_lock_token = $7",
        )
        .bind(cursor_to)
        .bind(now)
        .bind(clamp_count(stats.items_fetched))
        .bind(clamp_count(stats.items_stored))
        .bind(key.account_id)
        .bind(&key.resource_type)
        .bind(token.0)
        .execute(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                key = %key,
                token = %token,
                "complete_run ignored: token no longer owns the run lock"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn fail_run(
        &self,
        key: &SyncKey,
        token: RunToken,
        error: &str,
    ) -> TributaryResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "update sync_states
             set last_status = 'error', last_error = $1, last_run_finished_at = $2,
                 run_lock_token = null, run_lock_expires_at = null, updated_at = $2
             where account_id = $3 and resource_type = $4 and run_lock_token = $5",
        )
        .bind(error)
        .bind(now)
        .bind(key.account_id)
        .bind(&key.resource_type)
        .bind(token.0)
        .execute(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                key = %key,
                token = %token,
                "fail_run ignored: token no longer owns the run lock"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_enabled(&self, key: &SyncKey, enabled: bool) -> TributaryResult<SyncState> {
        let sql = format!(
            "insert into sync_states (account_id, resource_type, enabled)
             values ($1, $2, $3)
             on conflict (account_id, resource_type) do update
               set enabled = excluded.enabled, updated_at = now()
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key.account_id)
            .bind(&key.resource_type)
            .bind(enabled)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}
