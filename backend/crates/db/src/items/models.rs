use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One record fetched from the external system, normalised for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    /// Identifier taken from the external system. The upsert conflict key.
    pub natural_key: String,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl NormalizedItem {
    pub fn new(natural_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            natural_key: natural_key.into(),
            source_updated_at: None,
            payload,
        }
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.source_updated_at = Some(at);
        self
    }
}

/// A stored item row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedItem {
    pub account_id: Uuid,
    pub resource_type: String,
    pub natural_key: String,
    pub payload: serde_json::Value,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}
