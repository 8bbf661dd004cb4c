use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::accounts::repositories::AccountRepository;
use tributary_common::error::{TributaryError, TributaryResult};

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn list_active_accounts(&self) -> TributaryResult<Vec<Uuid>> {
        let rows = sqlx::query("select id from sync_accounts where active order by id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TributaryError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get::<Uuid, _>("id")).collect())
    }
}
