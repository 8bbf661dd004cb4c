//! Resource definitions: which collections of the source API are synced and
//! with which window parameters.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tributary_common::error::{TributaryError, TributaryResult};
use tributary_config::{
    SchedulerConfig, MAX_BACKFILL_DAYS, MAX_OVERLAP_MINUTES, MAX_RUN_INTERVAL_SECS,
};
use tributary_db::items::repositories::ItemRepository;
use tributary_sync::{ResourceDescriptor, ResourceRegistry};

use crate::source::adapter::HttpResourceAdapter;
use crate::source::client::ApiClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub resource_type: String,
    /// Collection path; `{account_id}` is substituted per account.
    pub path: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_updated_field")]
    pub updated_field: String,
    #[serde(default)]
    pub overlap_minutes: Option<i64>,
    #[serde(default)]
    pub backfill_days: Option<i64>,
    #[serde(default)]
    pub interval_secs: Option<i64>,
    /// `false` for endpoints without a modification-time filter.
    #[serde(default = "default_honors_window")]
    pub honors_window: bool,
}

fn default_key_field() -> String {
    "id".to_string()
}

fn default_updated_field() -> String {
    "updated_at".to_string()
}

fn default_honors_window() -> bool {
    true
}

impl ResourceDefinition {
    fn basic(resource_type: &str, path: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            path: path.to_string(),
            key_field: default_key_field(),
            updated_field: default_updated_field(),
            overlap_minutes: None,
            backfill_days: None,
            interval_secs: None,
            honors_window: true,
        }
    }

    fn validate(&self) -> TributaryResult<()> {
        let invalid = |what: &str| {
            Err(TributaryError::Validation(format!(
                "resource '{}': {what}",
                self.resource_type
            )))
        };

        if self.resource_type.trim().is_empty() {
            return Err(TributaryError::Validation(
                "resource type must not be empty".to_string(),
            ));
        }
        if self.path.trim().is_empty() {
            return invalid("path must not be empty");
        }
        if self.key_field.trim().is_empty() {
            return invalid("key_field must not be empty");
        }
        if self
            .overlap_minutes
            .is_some_and(|m| !(0..=MAX_OVERLAP_MINUTES as i64).contains(&m))
        {
            return invalid(&format!(
                "overlap_minutes must be between 0 and {MAX_OVERLAP_MINUTES}"
            ));
        }
        if self
            .backfill_days
            .is_some_and(|d| !(1..=MAX_BACKFILL_DAYS as i64).contains(&d))
        {
            return invalid(&format!(
                "backfill_days must be between 1 and {MAX_BACKFILL_DAYS}"
            ));
        }
        if self
            .interval_secs
            .is_some_and(|s| !(0..=MAX_RUN_INTERVAL_SECS as i64).contains(&s))
        {
            return invalid(&format!(
                "interval_secs must be between 0 and {MAX_RUN_INTERVAL_SECS}"
            ));
        }
        Ok(())
    }
}

/// Built-in resource set used when no definitions file is configured.
pub fn default_definitions() -> Vec<ResourceDefinition> {
    let orders = ResourceDefinition {
        key_field: "order_id".to_string(),
        ..ResourceDefinition::basic("orders", "/v1/accounts/{account_id}/orders")
    };
    let listings = ResourceDefinition {
        key_field: "listing_id".to_string(),
        backfill_days: Some(30),
        ..ResourceDefinition::basic("listings", "/v1/accounts/{account_id}/listings")
    };
    let returns = ResourceDefinition {
        key_field: "return_id".to_string(),
        honors_window: false,
        ..ResourceDefinition::basic("returns", "/v1/accounts/{account_id}/returns")
    };
    vec![orders, listings, returns]
}

/// Parse and validate a JSON array of definitions.
pub fn parse_definitions(json: &str) -> TributaryResult<Vec<ResourceDefinition>> {
    let definitions: Vec<ResourceDefinition> = serde_json::from_str(json)
        .map_err(|e| TributaryError::Config(format!("invalid resource definitions: {e}")))?;

    if definitions.is_empty() {
        return Err(TributaryError::Config(
            "resource definitions must not be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for definition in &definitions {
        definition.validate()?;
        if !seen.insert(definition.resource_type.as_str()) {
            return Err(TributaryError::Validation(format!(
                "resource '{}' is defined twice",
                definition.resource_type
            )));
        }
    }
    Ok(definitions)
}

/// Load definitions from `path`, or fall back to the built-in set.
pub fn load_definitions(path: Option<&str>) -> TributaryResult<Vec<ResourceDefinition>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| TributaryError::Config(format!("cannot read {path}: {e}")))?;
            parse_definitions(&raw)
        }
        None => Ok(default_definitions()),
    }
}

/// Register one HTTP adapter per definition.
pub fn build_registry<R>(
    definitions: Vec<ResourceDefinition>,
    client: Arc<ApiClient>,
    items: Arc<R>,
    config: &SchedulerConfig,
) -> TributaryResult<ResourceRegistry>
where
    R: ItemRepository + 'static,
{
    let mut registry = ResourceRegistry::new();

    for definition in definitions {
        definition.validate()?;
        let resource_type = definition.resource_type.clone();
        let overlap = definition.overlap_minutes.map(chrono::Duration::minutes);
        let backfill = definition.backfill_days.map(chrono::Duration::days);
        let interval = definition.interval_secs.map(chrono::Duration::seconds);

        if !definition.honors_window {
            tracing::info!(
                resource_type = %resource_type,
                "source has no modification filter, window used for bookkeeping only"
            );
        }

        let adapter = HttpResourceAdapter::new(Arc::clone(&client), definition, Arc::clone(&items));
        let mut descriptor = ResourceDescriptor::with_defaults(&resource_type, Arc::new(adapter), config)?;
        if let Some(overlap) = overlap {
            descriptor = descriptor.overlap(overlap);
        }
        if let Some(backfill) = backfill {
            descriptor = descriptor.backfill(backfill);
        }
        if let Some(interval) = interval {
            descriptor = descriptor.min_interval(interval);
        }
        registry.register(descriptor)?;
    }

    Ok(registry)
}
