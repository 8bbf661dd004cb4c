use std::sync::Mutex;

use async_trait::async_trait;

use crate::history::models::RunRecord;
use crate::history::repositories::RunHistoryRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

/// Process-local run history, for deployments without a database and for tests.
#[derive(Default)]
pub struct InMemoryRunHistoryRepository {
    records: Mutex<Vec<RunRecord>>,
}

impl InMemoryRunHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunHistoryRepository for InMemoryRunHistoryRepository {
    async fn insert(&self, record: &RunRecord) -> TributaryResult<()> {
        self.records
            .lock()
            .map_err(|_| TributaryError::Internal("run history mutex poisoned".to_owned()))?
            .push(record.clone());
        Ok(())
    }

    async fn list_recent(&self, key: &SyncKey, limit: i64) -> TributaryResult<Vec<RunRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| TributaryError::Internal("run history mutex poisoned".to_owned()))?;

        let mut matching: Vec<RunRecord> = records
            .iter()
            .filter(|r| r.account_id == key.account_id && r.resource_type == key.resource_type)
            .cloned()
            .collect();
        // Same order as the Postgres query; later inserts win ties.
        matching.reverse();
        matching.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matching.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(matching)
    }
}
