use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tributary_common::error::TributaryError;
use tributary_common::SyncKey;

/// Outcome recorded for the most recent run of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
    Running,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Running => "running",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = TributaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RunStatus::Ok),
            "error" => Ok(RunStatus::Error),
            "running" => Ok(RunStatus::Running),
            other => Err(TributaryError::Validation(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// Persisted progress of one (account, resource type) stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub account_id: Uuid,
    pub resource_type: String,
    /// End of the last fully processed window. Opaque to the store.
    pub cursor_value: Option<String>,
    pub enabled: bool,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub run_lock_token: Option<Uuid>,
    pub run_lock_expires_at: Option<DateTime<Utc>>,
    pub items_fetched: i64,
    pub items_stored: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// A fresh, never-run state row.
    pub fn new(key: &SyncKey, now: DateTime<Utc>) -> Self {
        Self {
            account_id: key.account_id,
            resource_type: key.resource_type.clone(),
            cursor_value: None,
            enabled: true,
            last_run_started_at: None,
            last_run_finished_at: None,
            last_status: None,
            last_error: None,
            run_lock_token: None,
            run_lock_expires_at: None,
            items_fetched: 0,
            items_stored: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SyncKey {
        SyncKey::new(self.account_id, self.resource_type.clone())
    }

    /// Whether a run lock is held and its lease has not run out at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        match (self.run_lock_token, self.run_lock_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Ownership proof for an in-flight run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunToken(pub Uuid);

impl RunToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A granted run lock together with the state as it was when the lock was taken.
#[derive(Debug, Clone)]
pub struct RunLease {
    pub token: RunToken,
    pub state: SyncState,
}

#[derive(Debug, Clone)]
pub enum StartRun {
    Started(RunLease),
    /// Another run holds an unexpired lock on the key.
    Busy,
}

/// Counters written alongside the cursor on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub items_fetched: u64,
    pub items_stored: u64,
}
