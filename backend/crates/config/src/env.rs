use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tributary_common::error::{TributaryError, TributaryResult};

/// Upper bound for any overlap, default or per resource.
pub const MAX_OVERLAP_MINUTES: u64 = 7 * 24 * 60;
/// Upper bound for any backfill, default or per resource.
pub const MAX_BACKFILL_DAYS: u64 = 10 * 365;
/// Upper bound for any per-key run interval.
pub const MAX_RUN_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: String,
    pub resources_file: Option<String>,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TributaryResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            db_max_connections: parse_var_or("DB_MAX_CONNECTIONS", 10)?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            resources_file: env::var("SYNC_RESOURCES_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            scheduler: SchedulerConfig::from_env()?,
        })
    }
}

/// Timing and concurrency knobs of the sync scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// How often a cycle starts.
    pub cycle_interval: Duration,
    /// Accounts processed at the same time.
    pub account_concurrency: usize,
    /// Deadline for a single (account, resource) run.
    pub run_timeout: Duration,
    /// Run-lock lease. Always longer than `run_timeout`.
    pub lock_lease: Duration,
    /// Minimum time between two runs of the same key.
    pub min_run_interval: Duration,
    pub default_overlap: Duration,
    pub default_backfill: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(300),
            account_concurrency: 5,
            run_timeout: Duration::from_secs(240),
            lock_lease: Duration::from_secs(300),
            min_run_interval: Duration::from_secs(240),
            default_overlap: Duration::from_secs(30 * 60),
            default_backfill: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> TributaryResult<Self> {
        let defaults = Self::default();

        let config = Self {
            cycle_interval: Duration::from_secs(parse_var_or(
                "SYNC_CYCLE_INTERVAL_SECS",
                defaults.cycle_interval.as_secs(),
            )?),
            account_concurrency: parse_var_or(
                "SYNC_ACCOUNT_CONCURRENCY",
                defaults.account_concurrency,
            )?,
            run_timeout: Duration::from_secs(parse_var_or(
                "SYNC_RUN_TIMEOUT_SECS",
                defaults.run_timeout.as_secs(),
            )?),
            lock_lease: Duration::from_secs(parse_var_or(
                "SYNC_LOCK_LEASE_SECS",
                defaults.lock_lease.as_secs(),
            )?),
            min_run_interval: Duration::from_secs(parse_var_or(
                "SYNC_MIN_RUN_INTERVAL_SECS",
                defaults.min_run_interval.as_secs(),
            )?),
            default_overlap: scaled_secs("SYNC_OVERLAP_MINUTES", 30, 60)?,
            default_backfill: scaled_secs("SYNC_BACKFILL_DAYS", 90, 24 * 60 * 60)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TributaryResult<()> {
        if self.account_concurrency == 0 {
            return Err(TributaryError::Config(
                "SYNC_ACCOUNT_CONCURRENCY must be at least 1".to_owned(),
            ));
        }
        if self.cycle_interval.is_zero() {
            return Err(TributaryError::Config(
                "SYNC_CYCLE_INTERVAL_SECS must be greater than zero".to_owned(),
            ));
        }
        if self.run_timeout.is_zero() {
            return Err(TributaryError::Config(
                "SYNC_RUN_TIMEOUT_SECS must be greater than zero".to_owned(),
            ));
        }
        if self.default_overlap > Duration::from_secs(MAX_OVERLAP_MINUTES * 60) {
            return Err(TributaryError::Config(format!(
                "SYNC_OVERLAP_MINUTES must be at most {MAX_OVERLAP_MINUTES}"
            )));
        }
        if self.default_backfill.is_zero()
            || self.default_backfill > Duration::from_secs(MAX_BACKFILL_DAYS * 24 * 60 * 60)
        {
            return Err(TributaryError::Config(format!(
                "SYNC_BACKFILL_DAYS must be between 1 and {MAX_BACKFILL_DAYS}"
            )));
        }
        if self.min_run_interval > Duration::from_secs(MAX_RUN_INTERVAL_SECS) {
            return Err(TributaryError::Config(format!(
                "SYNC_MIN_RUN_INTERVAL_SECS must be at most {MAX_RUN_INTERVAL_SECS}"
            )));
        }
        if self.lock_lease <= self.run_timeout {
            return Err(TributaryError::Config(format!(
                "SYNC_LOCK_LEASE_SECS ({}) must be greater than SYNC_RUN_TIMEOUT_SECS ({})",
                self.lock_lease.as_secs(),
                self.run_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

fn get_var(key: &str) -> TributaryResult<String> {
    env::var(key).map_err(|_| TributaryError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse `key` when set; a value that does not parse is a configuration error.
pub fn parse_var_or<T>(key: &str, default: T) -> TributaryResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TributaryError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn scaled_secs(key: &str, default: u64, unit_secs: u64) -> TributaryResult<Duration> {
    parse_var_or(key, default)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| TributaryError::Config(format!("{key} is out of range")))
}
