use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one synchronised stream: a resource type within one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    pub account_id: Uuid,
    pub resource_type: String,
}

impl SyncKey {
    pub fn new(account_id: Uuid, resource_type: impl Into<String>) -> Self {
        Self {
            account_id,
            resource_type: resource_type.into(),
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_account_and_resource() {
        let id = Uuid::nil();
        let key = SyncKey::new(id, "orders");
        assert_eq!(
            key.to_string(),
            "00000000-0000-0000-0000-000000000000/orders"
        );
    }

    #[test]
    fn keys_compare_by_both_fields() {
        let id = Uuid::new_v4();
        assert_eq!(SyncKey::new(id, "orders"), SyncKey::new(id, "orders"));
        assert_ne!(SyncKey::new(id, "orders"), SyncKey::new(id, "returns"));
        assert_ne!(
            SyncKey::new(id, "orders"),
            SyncKey::new(Uuid::new_v4(), "orders")
        );
    }

    #[test]
    fn serializes_as_plain_object() {
        let key = SyncKey::new(Uuid::nil(), "listings");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["resource_type"], "listings");
    }
}
