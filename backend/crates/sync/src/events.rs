//! Observability sink: one structured event per finished run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tributary_db::history::models::RunRecord;
use tributary_db::history::repositories::RunHistoryRepository;
use tributary_db::sync::models::RunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub account_id: Uuid,
    pub resource_type: String,
    pub status: RunStatus,
    pub items_fetched: u64,
    pub items_stored: u64,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Consumer of run events. Sinks swallow their own failures; reporting must
/// never affect the run it describes.
#[async_trait]
pub trait RunEventSink: Send + Sync {
    async fn emit(&self, event: &RunEvent);
}

/// Writes each event as one structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl RunEventSink for TracingEventSink {
    async fn emit(&self, event: &RunEvent) {
        let duration_ms = event.duration.as_millis() as u64;
        match &event.error {
            None => tracing::info!(
                account_id = %event.account_id,
                resource_type = %event.resource_type,
                status = %event.status,
                items_fetched = event.items_fetched,
                items_stored = event.items_stored,
                window_from = %event.window_from,
                window_to = %event.window_to,
                duration_ms,
                "sync run finished"
            ),
            Some(error) => tracing::warn!(
                account_id = %event.account_id,
                resource_type = %event.resource_type,
                status = %event.status,
                items_fetched = event.items_fetched,
                items_stored = event.items_stored,
                window_from = %event.window_from,
                window_to = %event.window_to,
                duration_ms,
                error = %error,
                "sync run failed"
            ),
        }
    }
}

/// Persists events into the run history table.
pub struct HistoryEventSink<R> {
    repo: R,
}

impl<R> HistoryEventSink<R>
where
    R: RunHistoryRepository,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }
}

pub(crate) fn event_to_record(event: &RunEvent) -> RunRecord {
    RunRecord {
        id: Uuid::new_v4(),
        account_id: event.account_id,
        resource_type: event.resource_type.clone(),
        status: event.status.as_str().to_string(),
        items_fetched: i64::try_from(event.items_fetched).unwrap_or(i64::MAX),
        items_stored: i64::try_from(event.items_stored).unwrap_or(i64::MAX),
        window_from: event.window_from,
        window_to: event.window_to,
        duration_ms: i64::try_from(event.duration.as_millis()).unwrap_or(i64::MAX),
        error: event.error.clone(),
        recorded_at: Utc::now(),
    }
}

#[async_trait]
impl<R> RunEventSink for HistoryEventSink<R>
where
    R: RunHistoryRepository,
{
    async fn emit(&self, event: &RunEvent) {
        if let Err(e) = self.repo.insert(&event_to_record(event)).await {
            tracing::warn!(
                account_id = %event.account_id,
                resource_type = %event.resource_type,
                error = %e,
                "failed to record run history"
            );
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn RunEventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn RunEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl RunEventSink for FanoutEventSink {
    async fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event).await;
        }
    }
}
