use std::sync::Arc;

use async_trait::async_trait;

use crate::history::models::RunRecord;
use tributary_common::error::TributaryResult;
use tributary_common::SyncKey;

#[async_trait]
pub trait RunHistoryRepository: Send + Sync {
    async fn insert(&self, record: &RunRecord) -> TributaryResult<()>;

    /// Most recent runs for a key, newest first.
    async fn list_recent(&self, key: &SyncKey, limit: i64) -> TributaryResult<Vec<RunRecord>>;
}

#[async_trait]
impl<T> RunHistoryRepository for Arc<T>
where
    T: RunHistoryRepository + ?Sized,
{
    async fn insert(&self, record: &RunRecord) -> TributaryResult<()> {
        (**self).insert(record).await
    }

    async fn list_recent(&self, key: &SyncKey, limit: i64) -> TributaryResult<Vec<RunRecord>> {
        (**self).list_recent(key, limit).await
    }
}
