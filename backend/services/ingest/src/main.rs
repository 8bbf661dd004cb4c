mod resources;
mod source;

use std::sync::Arc;

use tributary_config::{init_tracing, AppConfig};
use tributary_db::accounts::pg_repository::PgAccountRepository;
use tributary_db::history::pg_repository::PgRunHistoryRepository;
use tributary_db::items::pg_repository::PgItemRepository;
use tributary_db::sync::pg_repository::PgSyncStateRepository;
use tributary_sync::{
    FanoutEventSink, HistoryEventSink, Scheduler, SyncRunner, TracingEventSink, WorkerPool,
};

use crate::source::client::{ApiClient, ApiClientConfig};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    tracing::info!(service = "tributary-ingest", "starting");

    let config = AppConfig::from_env().expect("invalid configuration");
    let pool = tributary_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("failed to connect to database");
    tributary_db::run_migrations(&pool)
        .await
        .expect("failed to apply migrations");

    let client = ApiClient::new(ApiClientConfig::from_env().expect("invalid source API configuration"))
        .expect("failed to create source API client");

    let definitions = resources::load_definitions(config.resources_file.as_deref())
        .expect("invalid resource definitions");
    let registry = Arc::new(
        resources::build_registry(
            definitions,
            Arc::new(client),
            Arc::new(PgItemRepository::new(pool.clone())),
            &config.scheduler,
        )
        .expect("failed to build resource registry"),
    );

    let sink = FanoutEventSink::new()
        .with(Arc::new(TracingEventSink))
        .with(Arc::new(HistoryEventSink::new(PgRunHistoryRepository::new(
            pool.clone(),
        ))));

    let store = Arc::new(PgSyncStateRepository::new(pool.clone()));
    let runner = Arc::new(
        SyncRunner::new(store, Arc::new(sink), &config.scheduler)
            .expect("invalid scheduler configuration"),
    );
    let workers = WorkerPool::new(config.scheduler.account_concurrency)
        .expect("invalid account concurrency");

    let scheduler = Scheduler::new(
        runner,
        PgAccountRepository::new(pool.clone()),
        registry,
        workers,
        &config.scheduler,
    );

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    pool.close().await;
    tracing::info!("ingest service stopped");
}
