use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted record of one finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub resource_type: String,
    pub status: String,
    pub items_fetched: i64,
    pub items_stored: i64,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
