//! Cycle driver: shuffles accounts, bounds how many run at once and runs every
//! resource type of one account side by side.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use tributary_common::error::TributaryResult;
use tributary_common::SyncKey;
use tributary_config::SchedulerConfig;
use tributary_db::accounts::repositories::AccountRepository;
use tributary_db::sync::repositories::SyncStateRepository;

use crate::gating::is_due;
use crate::pool::WorkerPool;
use crate::registry::{ResourceDescriptor, ResourceRegistry};
use crate::runner::{RunOutcome, RunResult, SyncRunner};

/// What happened to one (account, resource) key in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    Ran(RunResult),
    Busy,
    Disabled,
    NotDue,
    /// The key could not be processed at all: a store error, or a panic that
    /// escaped the runner.
    Errored(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub accounts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub busy: usize,
    pub skipped: usize,
    pub errored: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: &KeyOutcome) {
        match outcome {
            KeyOutcome::Ran(run) if run.is_ok() => self.succeeded += 1,
            KeyOutcome::Ran(_) => self.failed += 1,
            KeyOutcome::Busy => self.busy += 1,
            KeyOutcome::Disabled | KeyOutcome::NotDue => self.skipped += 1,
            KeyOutcome::Errored(_) => self.errored += 1,
        }
    }
}

pub struct Scheduler<S, A> {
    runner: Arc<SyncRunner<S>>,
    accounts: A,
    registry: Arc<ResourceRegistry>,
    pool: WorkerPool,
    cycle_interval: Duration,
}

impl<S, A> Scheduler<S, A>
where
    S: SyncStateRepository + 'static,
    A: AccountRepository,
{
    pub fn new(
        runner: Arc<SyncRunner<S>>,
        accounts: A,
        registry: Arc<ResourceRegistry>,
        pool: WorkerPool,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            runner,
            accounts,
            registry,
            pool,
            cycle_interval: config.cycle_interval,
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Run cycles every `cycle_interval` until `shutdown` resolves. A cycle in
    /// progress is allowed to finish.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.cycle_interval.as_secs(),
            concurrency = self.pool.size(),
            resources = ?self.registry.resource_types(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, scheduler stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "sync cycle aborted");
            }
        }
    }

    /// One pass over every active account.
    pub async fn run_cycle(&self) -> TributaryResult<CycleSummary> {
        let started = Instant::now();
        let mut accounts = self.accounts.list_active_accounts().await?;
        accounts.shuffle(&mut rand::thread_rng());

        let mut summary = CycleSummary {
            accounts: accounts.len(),
            ..CycleSummary::default()
        };

        let mut set = JoinSet::new();
        for account_id in accounts {
            let runner = Arc::clone(&self.runner);
            let registry = Arc::clone(&self.registry);
            self.pool
                .spawn(&mut set, process_account(runner, registry, account_id))
                .await?;
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcomes) => outcomes.iter().for_each(|o| summary.record(o)),
                Err(e) => {
                    tracing::error!(error = %e, "account task aborted");
                    summary.errored += 1;
                }
            }
        }

        tracing::info!(
            accounts = summary.accounts,
            succeeded = summary.succeeded,
            failed = summary.failed,
            busy = summary.busy,
            skipped = summary.skipped,
            errored = summary.errored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync cycle finished"
        );
        Ok(summary)
    }
}

async fn process_account<S>(
    runner: Arc<SyncRunner<S>>,
    registry: Arc<ResourceRegistry>,
    account_id: Uuid,
) -> Vec<KeyOutcome>
where
    S: SyncStateRepository + 'static,
{
    let mut set = JoinSet::new();
    for descriptor in registry.iter() {
        let runner = Arc::clone(&runner);
        let descriptor = Arc::clone(descriptor);
        set.spawn(async move {
            let resource_type = descriptor.resource_type.clone();
            match AssertUnwindSafe(run_key(&runner, account_id, &descriptor))
                .catch_unwind()
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::error!(
                        account_id = %account_id,
                        resource_type = %resource_type,
                        error = %e,
                        "sync key could not be processed"
                    );
                    KeyOutcome::Errored(e.to_string())
                }
                Err(_) => {
                    tracing::error!(
                        account_id = %account_id,
                        resource_type = %resource_type,
                        "sync run panicked outside the adapter; lock left to lease expiry"
                    );
                    KeyOutcome::Errored("run panicked".to_owned())
                }
            }
        });
    }

    let mut outcomes = Vec::with_capacity(registry.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                tracing::error!(account_id = %account_id, error = %e, "resource task aborted");
                outcomes.push(KeyOutcome::Errored(e.to_string()));
            }
        }
    }
    outcomes
}

async fn run_key<S>(
    runner: &SyncRunner<S>,
    account_id: Uuid,
    descriptor: &ResourceDescriptor,
) -> TributaryResult<KeyOutcome>
where
    S: SyncStateRepository,
{
    let key = SyncKey::new(account_id, descriptor.resource_type.clone());
    let state = runner.store().get_or_create(&key).await?;

    if !state.enabled {
        tracing::debug!(key = %key, "sync key disabled, skipping");
        return Ok(KeyOutcome::Disabled);
    }
    if !is_due(&state, Utc::now(), descriptor.min_interval) {
        tracing::debug!(key = %key, "sync key ran recently, skipping");
        return Ok(KeyOutcome::NotDue);
    }

    Ok(match runner.run(account_id, descriptor).await? {
        RunOutcome::Busy => KeyOutcome::Busy,
        RunOutcome::Ran(run) => KeyOutcome::Ran(run),
    })
}
