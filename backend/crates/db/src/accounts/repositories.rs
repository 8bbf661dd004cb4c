use async_trait::async_trait;
use uuid::Uuid;

use tributary_common::error::TributaryResult;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Accounts that should be synchronised in the current cycle.
    async fn list_active_accounts(&self) -> TributaryResult<Vec<Uuid>>;
}
