use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::items::models::{NormalizedItem, SyncedItem};
use crate::items::repositories::ItemRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

#[derive(Clone)]
pub struct PgItemRepository {
    pool: PgPool,
}

impl PgItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRepository for PgItemRepository {
    /// One transaction per call, one statement per item, applied in order so a
    /// later copy of a natural key wins.
    async fn upsert_items(&self, key: &SyncKey, items: &[NormalizedItem]) -> TributaryResult<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        for item in items {
            sqlx::query(
                "insert into synced_items
                 (account_id, resource_type, natural_key, payload, source_updated_at,
                  first_seen_at, last_synced_at)
                 values ($1, $2, $3, $4, $5, $6, $6)
                 on conflict (account_id, resource_type, natural_key) do update set
                   payload = excluded.payload,
                   source_updated_at = excluded.source_updated_at,
                   last_synced_at = excluded.last_synced_at",
            )
            .bind(key.account_id)
            .bind(&key.resource_type)
            .bind(&item.natural_key)
            .bind(&item.payload)
            .bind(item.source_updated_at)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        Ok(items.len())
    }

    async fn get_item(
        &self,
        key: &SyncKey,
        natural_key: &str,
    ) -> TributaryResult<Option<SyncedItem>> {
        let row = sqlx::query(
            "select account_id, resource_type, natural_key, payload, source_updated_at,
                    first_seen_at, last_synced_at
             from synced_items
             where account_id = $1 and resource_type = $2 and natural_key = $3",
        )
        .bind(key.account_id)
        .bind(&key.resource_type)
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;

        Ok(row.map(|r| SyncedItem {
            account_id: r.get("account_id"),
            resource_type: r.get("resource_type"),
            natural_key: r.get("natural_key"),
            payload: r.get("payload"),
            source_updated_at: r.get("source_updated_at"),
            first_seen_at: r.get("first_seen_at"),
            last_synced_at: r.get("last_synced_at"),
        }))
    }

    async fn count_items(&self, key: &SyncKey) -> TributaryResult<i64> {
        let row = sqlx::query(
            "select count(*) as cnt from synced_items
             where account_id = $1 and resource_type = $2",
        )
        .bind(key.account_id)
        .bind(&key.resource_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("cnt"))
    }
}
