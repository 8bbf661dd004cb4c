//! The table of resource types the scheduler knows about.
//!
//! A new resource type is added by registering a descriptor; the runner and
//! scheduler are the same for every type.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;

use tributary_common::error::{TributaryError, TributaryResult};
use tributary_config::{
    SchedulerConfig, MAX_BACKFILL_DAYS, MAX_OVERLAP_MINUTES, MAX_RUN_INTERVAL_SECS,
};

use crate::adapter::ResourceAdapter;

#[derive(Clone)]
pub struct ResourceDescriptor {
    pub resource_type: String,
    pub overlap: Duration,
    pub backfill: Duration,
    /// Minimum time between two runs of the same (account, resource) key.
    pub min_interval: Duration,
    pub adapter: Arc<dyn ResourceAdapter>,
}

impl ResourceDescriptor {
    /// Descriptor with window parameters taken from the scheduler defaults.
    pub fn with_defaults(
        resource_type: impl Into<String>,
        adapter: Arc<dyn ResourceAdapter>,
        config: &SchedulerConfig,
    ) -> TributaryResult<Self> {
        Ok(Self {
            resource_type: resource_type.into(),
            overlap: to_chrono(config.default_overlap, "default overlap")?,
            backfill: to_chrono(config.default_backfill, "default backfill")?,
            min_interval: to_chrono(config.min_run_interval, "minimum run interval")?,
            adapter,
        })
    }

    pub fn overlap(mut self, overlap: Duration) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn backfill(mut self, backfill: Duration) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("resource_type", &self.resource_type)
            .field("overlap", &self.overlap)
            .field("backfill", &self.backfill)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

pub(crate) fn to_chrono(value: std::time::Duration, what: &str) -> TributaryResult<Duration> {
    Duration::from_std(value)
        .map_err(|e| TributaryError::Config(format!("{what} out of range: {e}")))
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    descriptors: Vec<Arc<ResourceDescriptor>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ResourceDescriptor) -> TributaryResult<()> {
        if descriptor.resource_type.trim().is_empty() {
            return Err(TributaryError::Validation(
                "resource type must not be empty".to_owned(),
            ));
        }
        let max_overlap = Duration::minutes(MAX_OVERLAP_MINUTES as i64);
        let max_backfill = Duration::days(MAX_BACKFILL_DAYS as i64);
        let max_interval = Duration::seconds(MAX_RUN_INTERVAL_SECS as i64);
        if descriptor.overlap < Duration::zero() || descriptor.overlap > max_overlap {
            return Err(TributaryError::Validation(format!(
                "resource '{}': overlap must be between 0 and {MAX_OVERLAP_MINUTES} minutes",
                descriptor.resource_type
            )));
        }
        if descriptor.backfill <= Duration::zero() || descriptor.backfill > max_backfill {
            return Err(TributaryError::Validation(format!(
                "resource '{}': backfill must be positive and at most {MAX_BACKFILL_DAYS} days",
                descriptor.resource_type
            )));
        }
        if descriptor.min_interval < Duration::zero() || descriptor.min_interval > max_interval {
            return Err(TributaryError::Validation(format!(
                "resource '{}': run interval must be between 0 and {MAX_RUN_INTERVAL_SECS} seconds",
                descriptor.resource_type
            )));
        }
        if self.get(&descriptor.resource_type).is_some() {
            return Err(TributaryError::Validation(format!(
                "resource '{}' is already registered",
                descriptor.resource_type
            )));
        }
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<ResourceDescriptor>> {
        self.descriptors
            .iter()
            .find(|d| d.resource_type == resource_type)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceDescriptor>> {
        self.descriptors.iter()
    }

    pub fn resource_types(&self) -> Vec<&str> {
        self.descriptors
            .iter()
            .map(|d| d.resource_type.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
