use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::window::SyncWindow;

pub use tributary_db::items::models::NormalizedItem;

/// One page returned by [`ResourceAdapter::fetch_page`].
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<NormalizedItem>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

impl Page {
    pub fn last(items: Vec<NormalizedItem>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    pub fn with_next(items: Vec<NormalizedItem>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The source did not return a usable page: network, auth, rate limit or a
    /// malformed response.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The local store rejected the write.
    #[error("upsert failed: {0}")]
    Upsert(String),
}

/// Uniform contract every resource type implements.
///
/// `fetch_page` must be safe to repeat for the same window, and pagination must
/// terminate. `upsert` must insert-or-update by natural key so that re-fetched
/// items overwrite rather than duplicate. Adapters whose source cannot filter by
/// modification time may ignore `window.from`; natural-key upserts keep them
/// convergent.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    async fn fetch_page(
        &self,
        account_id: Uuid,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<Page, AdapterError>;

    /// Returns the number of items stored.
    async fn upsert(&self, account_id: Uuid, items: &[NormalizedItem])
        -> Result<usize, AdapterError>;
}
