use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::items::models::{NormalizedItem, SyncedItem};
use crate::items::repositories::ItemRepository;
use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;

type ItemKey = (SyncKey, String);

/// Process-local item store keyed exactly like the `synced_items` table.
#[derive(Default)]
pub struct InMemoryItemRepository {
    items: Mutex<HashMap<ItemKey, SyncedItem>>,
}

impl InMemoryItemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemRepository for InMemoryItemRepository {
    async fn upsert_items(&self, key: &SyncKey, items: &[NormalizedItem]) -> TributaryResult<usize> {
        let now = Utc::now();
        let mut stored = self
            .items
            .lock()
            .map_err(|_| TributaryError::Internal("item store mutex poisoned".to_owned()))?;

        for item in items {
            stored
                .entry((key.clone(), item.natural_key.clone()))
                .and_modify(|existing| {
                    existing.payload = item.payload.clone();
                    existing.source_updated_at = item.source_updated_at;
                    existing.last_synced_at = now;
                })
                .or_insert_with(|| SyncedItem {
                    account_id: key.account_id,
                    resource_type: key.resource_type.clone(),
                    natural_key: item.natural_key.clone(),
                    payload: item.payload.clone(),
                    source_updated_at: item.source_updated_at,
                    first_seen_at: now,
                    last_synced_at: now,
                });
        }

        Ok(items.len())
    }

    async fn get_item(
        &self,
        key: &SyncKey,
        natural_key: &str,
    ) -> TributaryResult<Option<SyncedItem>> {
        let stored = self
            .items
            .lock()
            .map_err(|_| TributaryError::Internal("item store mutex poisoned".to_owned()))?;
        Ok(stored.get(&(key.clone(), natural_key.to_owned())).cloned())
    }

    async fn count_items(&self, key: &SyncKey) -> TributaryResult<i64> {
        let stored = self
            .items
            .lock()
            .map_err(|_| TributaryError::Internal("item store mutex poisoned".to_owned()))?;
        Ok(stored.keys().filter(|(k, _)| k == key).count() as i64)
    }
}
