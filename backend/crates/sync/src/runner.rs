//! The per-run state machine shared by every resource type.
//!
//! `Locking -> Windowing -> (Fetching -> Upserting)* -> Committing`, with any
//! failure after the lock is taken ending in `fail_run`.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use tributary_common::error::TributaryResult;
use tributary_common::SyncKey;
use tributary_config::SchedulerConfig;
use tributary_db::sync::models::{RunLease, RunStats, RunStatus, RunToken, StartRun};
use tributary_db::sync::repositories::SyncStateRepository;

use crate::adapter::{AdapterError, ResourceAdapter};
use crate::events::{RunEvent, RunEventSink};
use crate::registry::{to_chrono, ResourceDescriptor};
use crate::window::{compute_window, format_cursor, SyncWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Locking,
    Windowing,
    Fetching,
    Upserting,
    Committing,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Locking => "locking",
            RunPhase::Windowing => "windowing",
            RunPhase::Fetching => "fetching",
            RunPhase::Upserting => "upserting",
            RunPhase::Committing => "committing",
        };
        f.write_str(s)
    }
}

/// Why a run ended in `error`. The display text is persisted as `last_error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunFailure {
    #[error("fetch failed on page {page}: {message}")]
    Fetch { page: usize, message: String },

    #[error("upsert failed on page {page}: {message}")]
    Upsert { page: usize, message: String },

    #[error("pagination stalled on page {page}: token '{token}' repeated")]
    StalledPagination { page: usize, token: String },

    #[error("run timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("run panicked: {0}")]
    Panicked(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("run lock lost before commit")]
    LockLost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub key: SyncKey,
    pub status: RunStatus,
    pub items_fetched: u64,
    pub items_stored: u64,
    pub window: SyncWindow,
    pub duration: Duration,
    pub error: Option<String>,
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn to_event(&self) -> RunEvent {
        RunEvent {
            account_id: self.key.account_id,
            resource_type: self.key.resource_type.clone(),
            status: self.status,
            items_fetched: self.items_fetched,
            items_stored: self.items_stored,
            window_from: self.window.from,
            window_to: self.window.to,
            duration: self.duration,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run holds the lock for this key. Not an error.
    Busy,
    Ran(RunResult),
}

#[derive(Debug, Default)]
struct Progress {
    pages: usize,
    fetched: u64,
    stored: u64,
}

/// Executes one run for one (account, resource) key.
pub struct SyncRunner<S> {
    store: Arc<S>,
    sink: Arc<dyn RunEventSink>,
    run_timeout: Duration,
    lock_lease: chrono::Duration,
}

impl<S> SyncRunner<S>
where
    S: SyncStateRepository,
{
    pub fn new(
        store: Arc<S>,
        sink: Arc<dyn RunEventSink>,
        config: &SchedulerConfig,
    ) -> TributaryResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            sink,
            run_timeout: config.run_timeout,
            lock_lease: to_chrono(config.lock_lease, "lock lease")?,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `descriptor` for `account_id` once.
    ///
    /// Adapter failures, timeouts and panics after the lock is taken come back
    /// as `Ran` with status `error`; only a failure to take the lock at all is
    /// returned as `Err`.
    pub async fn run(
        &self,
        account_id: Uuid,
        descriptor: &ResourceDescriptor,
    ) -> TributaryResult<RunOutcome> {
        let key = SyncKey::new(account_id, descriptor.resource_type.clone());

        tracing::debug!(key = %key, phase = %RunPhase::Locking, "acquiring run lock");
        let lease = match self.store.try_start_run(&key, self.lock_lease).await? {
            StartRun::Started(lease) => lease,
            StartRun::Busy => {
                tracing::info!(key = %key, "sync run already in progress, skipping");
                return Ok(RunOutcome::Busy);
            }
        };

        let started = Instant::now();
        // Cursors are stored with microsecond precision.
        let now = Utc::now().trunc_subsecs(6);
        let mut window = SyncWindow { from: now, to: now };
        let mut progress = Progress::default();

        // Everything past this point holds the lock, so a panic anywhere in it
        // must still end in `fail_run`.
        let guarded = AssertUnwindSafe(self.execute(
            &key,
            descriptor,
            &lease,
            now,
            &mut window,
            &mut progress,
        ))
        .catch_unwind()
        .await;

        let failure = match guarded {
            Ok(failure) => failure,
            Err(panic) => {
                let failure = RunFailure::Panicked(panic_message(panic.as_ref()));
                tracing::error!(key = %key, error = %failure, "sync run panicked");
                self.release_failed(&key, lease.token, &failure).await;
                Some(failure)
            }
        };

        let run = RunResult {
            key,
            status: if failure.is_some() {
                RunStatus::Error
            } else {
                RunStatus::Ok
            },
            items_fetched: progress.fetched,
            items_stored: progress.stored,
            window,
            duration: started.elapsed(),
            error: failure.map(|f| f.to_string()),
        };

        self.sink.emit(&run.to_event()).await;
        Ok(RunOutcome::Ran(run))
    }

    async fn execute(
        &self,
        key: &SyncKey,
        descriptor: &ResourceDescriptor,
        lease: &RunLease,
        now: DateTime<Utc>,
        window: &mut SyncWindow,
        progress: &mut Progress,
    ) -> Option<RunFailure> {
        let planned = compute_window(
            lease.state.cursor_value.as_deref(),
            now,
            descriptor.overlap,
            descriptor.backfill,
        );
        *window = planned;
        tracing::debug!(
            key = %key,
            phase = %RunPhase::Windowing,
            window = %planned,
            "window computed"
        );

        let fetched = tokio::time::timeout(
            self.run_timeout,
            fetch_all(descriptor.adapter.as_ref(), key, &planned, &mut *progress),
        )
        .await
        .unwrap_or(Err(RunFailure::Timeout(self.run_timeout)));

        if let Err(failure) = fetched {
            self.release_failed(key, lease.token, &failure).await;
            return Some(failure);
        }

        let stats = RunStats {
            items_fetched: progress.fetched,
            items_stored: progress.stored,
        };
        tracing::debug!(key = %key, phase = %RunPhase::Committing, "committing cursor");
        match self
            .store
            .complete_run(key, lease.token, &format_cursor(planned.to), stats)
            .await
        {
            Ok(true) => None,
            Ok(false) => Some(RunFailure::LockLost),
            Err(e) => {
                let failure = RunFailure::Commit(e.to_string());
                self.release_failed(key, lease.token, &failure).await;
                Some(failure)
            }
        }
    }

    async fn release_failed(
        &self,
        key: &SyncKey,
        token: RunToken,
        failure: &RunFailure,
    ) {
        if let Err(e) = self.store.fail_run(key, token, &failure.to_string()).await {
            // The lease expires on its own; the next cycle retries the key.
            tracing::error!(key = %key, error = %e, "failed to record run failure");
        }
    }
}

async fn fetch_all(
    adapter: &dyn ResourceAdapter,
    key: &SyncKey,
    window: &SyncWindow,
    progress: &mut Progress,
) -> Result<(), RunFailure> {
    let mut page_token: Option<String> = None;

    loop {
        let page_no = progress.pages + 1;
        tracing::debug!(key = %key, phase = %RunPhase::Fetching, page = page_no, "fetching page");

        let page = adapter
            .fetch_page(key.account_id, window, page_token.as_deref())
            .await
            .map_err(|e| RunFailure::Fetch {
                page: page_no,
                message: adapter_message(e),
            })?;
        progress.pages = page_no;
        progress.fetched += page.items.len() as u64;

        if !page.items.is_empty() {
            tracing::debug!(
                key = %key,
                phase = %RunPhase::Upserting,
                page = page_no,
                count = page.items.len(),
                "upserting page"
            );
            let stored = adapter
                .upsert(key.account_id, &page.items)
                .await
                .map_err(|e| RunFailure::Upsert {
                    page: page_no,
                    message: adapter_message(e),
                })?;
            progress.stored += stored as u64;
        }

        match page.next_page_token {
            None => return Ok(()),
            Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                return Err(RunFailure::StalledPagination {
                    page: page_no,
                    token: next,
                });
            }
            Some(next) => page_token = Some(next),
        }
    }
}

fn adapter_message(err: AdapterError) -> String {
    match err {
        AdapterError::Fetch(msg) | AdapterError::Upsert(msg) => msg,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
