use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use tributary_common::SyncKey;
use tributary_db::items::repositories::ItemRepository;
use tributary_sync::{AdapterError, NormalizedItem, Page, ResourceAdapter, SyncWindow};

use super::client::{ApiClient, PageQuery};
use crate::resources::ResourceDefinition;

/// Adapter for one JSON collection endpoint of the source API.
///
/// Items are stored in the generic item table under the natural key read from
/// `key_field`.
pub struct HttpResourceAdapter<R> {
    client: Arc<ApiClient>,
    definition: ResourceDefinition,
    items: Arc<R>,
}

impl<R> HttpResourceAdapter<R>
where
    R: ItemRepository,
{
    pub fn new(client: Arc<ApiClient>, definition: ResourceDefinition, items: Arc<R>) -> Self {
        Self {
            client,
            definition,
            items,
        }
    }

    fn path_for(&self, account_id: Uuid) -> String {
        self.definition
            .path
            .replace("{account_id}", &account_id.to_string())
    }

    fn normalize(&self, raw: Value) -> Result<NormalizedItem, AdapterError> {
        let natural_key = lookup(&raw, &self.definition.key_field)
            .and_then(key_to_string)
            .ok_or_else(|| {
                AdapterError::Fetch(format!(
                    "{} item without natural key field '{}'",
                    self.definition.resource_type, self.definition.key_field
                ))
            })?;

        let updated_at = lookup(&raw, &self.definition.updated_field)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut item = NormalizedItem::new(natural_key, raw);
        item.source_updated_at = updated_at;
        Ok(item)
    }
}

/// Top-level field name, or a JSON pointer when the field starts with `/`.
fn lookup<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    if field.starts_with('/') {
        value.pointer(field)
    } else {
        value.get(field)
    }
}

fn key_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl<R> ResourceAdapter for HttpResourceAdapter<R>
where
    R: ItemRepository + 'static,
{
    async fn fetch_page(
        &self,
        account_id: Uuid,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<Page, AdapterError> {
        let query = if self.definition.honors_window {
            PageQuery {
                modified_since: Some(window.from),
                modified_until: Some(window.to),
                page_token,
            }
        } else {
            // Source has no modification filter; fetch the latest pages and let
            // natural-key upserts converge.
            PageQuery {
                page_token,
                ..PageQuery::default()
            }
        };

        let page = self
            .client
            .fetch_page(&self.path_for(account_id), &query)
            .await
            .map_err(|e| AdapterError::Fetch(e.to_string()))?;

        let items = page
            .items
            .into_iter()
            .map(|raw| self.normalize(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn upsert(
        &self,
        account_id: Uuid,
        items: &[NormalizedItem],
    ) -> Result<usize, AdapterError> {
        let key = SyncKey::new(account_id, self.definition.resource_type.clone());
        self.items
            .upsert_items(&key, items)
            .await
            .map_err(|e| AdapterError::Upsert(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::client::ApiClientConfig;
    use chrono::TimeZone;
    use tributary_db::items::memory::InMemoryItemRepository;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Arc<ApiClient> {
        Arc::new(
            ApiClient::new(ApiClientConfig {
                base_url: "http://localhost".to_string(),
                token: "t".to_string(),
                page_size: 100,
                max_retries: 0,
                timeout_secs: 5,
            })
            .unwrap()
            .with_base_url(&server.uri()),
        )
    }

    fn definition(honors_window: bool) -> ResourceDefinition {
        ResourceDefinition {
            resource_type: "orders".to_string(),
            path: "/v1/accounts/{account_id}/orders".to_string(),
            key_field: "order_id".to_string(),
            updated_field: "updated_at".to_string(),
            overlap_minutes: None,
            backfill_days: None,
            interval_secs: None,
            honors_window,
        }
    }

    fn window() -> SyncWindow {
        SyncWindow {
            from: Utc.with_ymd_and_hms(2026, 3, 1, 11, 30, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn fetch_normalizes_items() {
        let server = MockServer::start().await;
        let account = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{account}/orders")))
            .and(query_param("modified_since", "2026-03-01T11:30:00.000000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"order_id": "A-1", "updated_at": "2026-03-01T11:45:00Z", "total": 10},
                    {"order_id": 2, "total": 4}
                ],
                "next_page_token": "c2"
            })))
            .mount(&server)
            .await;

        let adapter = HttpResourceAdapter::new(
            client(&server),
            definition(true),
            Arc::new(InMemoryItemRepository::new()),
        );
        let page = adapter.fetch_page(account, &window(), None).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].natural_key, "A-1");
        assert_eq!(
            page.items[0].source_updated_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 45, 0).unwrap())
        );
        assert_eq!(page.items[1].natural_key, "2");
        assert!(page.items[1].source_updated_at.is_none());
        assert_eq!(page.next_page_token.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn window_is_omitted_when_source_cannot_filter() {
        let server = MockServer::start().await;
        let account = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{account}/orders")))
            .and(query_param_is_missing("modified_since"))
            .and(query_param_is_missing("modified_until"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpResourceAdapter::new(
            client(&server),
            definition(false),
            Arc::new(InMemoryItemRepository::new()),
        );
        let page = adapter.fetch_page(account, &window(), None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn item_without_key_fails_the_page() {
        let server = MockServer::start().await;
        let account = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/v1/accounts/{account}/orders")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"total": 3}]
            })))
            .mount(&server)
            .await;

        let adapter = HttpResourceAdapter::new(
            client(&server),
            definition(true),
            Arc::new(InMemoryItemRepository::new()),
        );
        let err = adapter.fetch_page(account, &window(), None).await.unwrap_err();
        assert!(matches!(err, AdapterError::Fetch(msg) if msg.contains("order_id")));
    }

    #[tokio::test]
    async fn http_errors_become_fetch_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let adapter = HttpResourceAdapter::new(
            client(&server),
            definition(true),
            Arc::new(InMemoryItemRepository::new()),
        );
        let err = adapter
            .fetch_page(Uuid::new_v4(), &window(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Fetch(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn upsert_writes_under_resource_key() {
        let server = MockServer::start().await;
        let items = Arc::new(InMemoryItemRepository::new());
        let adapter = HttpResourceAdapter::new(client(&server), definition(true), items.clone());
        let account = Uuid::new_v4();

        let batch = vec![
            NormalizedItem::new("A-1", serde_json::json!({"v": 1})),
            NormalizedItem::new("A-1", serde_json::json!({"v": 2})),
        ];
        assert_eq!(adapter.upsert(account, &batch).await.unwrap(), 2);

        let key = SyncKey::new(account, "orders");
        assert_eq!(items.count_items(&key).await.unwrap(), 1);
        let stored = items.get_item(&key, "A-1").await.unwrap().unwrap();
        assert_eq!(stored.payload["v"], 2);
    }

    #[test]
    fn json_pointer_keys() {
        let raw = serde_json::json!({"meta": {"ref": "R-9"}});
        assert_eq!(lookup(&raw, "/meta/ref").and_then(key_to_string), Some("R-9".to_string()));
        assert!(lookup(&raw, "ref").is_none());
    }
}
