use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::history::models::RunRecord;
use crate::history::repositories::RunHistoryRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

#[derive(Clone)]
pub struct PgRunHistoryRepository {
    pool: PgPool,
}

impl PgRunHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunHistoryRepository for PgRunHistoryRepository {
    async fn insert(&self, record: &RunRecord) -> TributaryResult<()> {
        sqlx::query(
            "insert into sync_run_history
             (id, account_id, resource_type, status, items_fetched, items_stored,
              window_from, window_to, duration_ms, error, recorded_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.resource_type)
        .bind(&record.status)
        .bind(record.items_fetched)
        .bind(record.items_stored)
        .bind(record.window_from)
        .bind(record.window_to)
        .bind(record.duration_ms)
        .bind(&record.error)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_recent(&self, key: &SyncKey, limit: i64) -> TributaryResult<Vec<RunRecord>> {
        let rows = sqlx::query(
            "select id, account_id, resource_type, status, items_fetched, items_stored,
                    window_from, window_to, duration_ms, error, recorded_at
             from sync_run_history
             where account_id = $1 and resource_type = $2
             order by recorded_at desc
             limit $3",
        )
        .bind(key.account_id)
        .bind(&key.resource_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| RunRecord {
                id: r.get("id"),
                account_id: r.get("account_id"),
                resource_type: r.get("resource_type"),
                status: r.get("status"),
                items_fetched: r.get("items_fetched"),
                items_stored: r.get("items_stored"),
                window_from: r.get("window_from"),
                window_to: r.get("window_to"),
                duration_ms: r.get("duration_ms"),
                error: r.get("error"),
                recorded_at: r.get("recorded_at"),
            })
            .collect())
    }
}
