use async_trait::async_trait;

use crate::items::models::{NormalizedItem, SyncedItem};
use tributary_common::error::TributaryResult;
use tributary_common::SyncKey;

#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert or update each item keyed by (account_id, resource_type, natural_key).
    /// Later items in the slice win over earlier ones with the same key;
    /// `first_seen_at` is preserved on update. Returns the number of items written.
    async fn upsert_items(&self, key: &SyncKey, items: &[NormalizedItem]) -> TributaryResult<usize>;

    async fn get_item(&self, key: &SyncKey, natural_key: &str)
        -> TributaryResult<Option<SyncedItem>>;

    async fn count_items(&self, key: &SyncKey) -> TributaryResult<i64>;
}
