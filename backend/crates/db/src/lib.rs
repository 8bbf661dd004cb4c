pub mod accounts;
pub mod history;
pub mod items;
pub mod sync;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tributary_common::error::{TributaryError, TributaryResult};

/// Create a Postgres connection pool from a database URL.
///
/// Each sync run checks connections out independently, so the pool size bounds
/// how many runs can touch the database at the same moment.
pub async fn create_pool(database_url: &str, max_connections: u32) -> TributaryResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| TributaryError::Database(e.to_string()))
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> TributaryResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| TributaryError::Database(format!("migration failed: {e}")))
}
