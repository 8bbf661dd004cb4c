//! Out-of-cycle control of single keys: pause, resume, run now and inspect.
//!
//! Both paths go through the same store operations as scheduled runs, so the
//! one-run-per-key guarantee holds regardless of who starts a run.

use std::sync::Arc;

use uuid::Uuid;

use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;
use tributary_db::history::models::RunRecord;
use tributary_db::history::repositories::RunHistoryRepository;
use tributary_db::sync::models::SyncState;
use tributary_db::sync::repositories::SyncStateRepository;

use crate::registry::{ResourceDescriptor, ResourceRegistry};
use crate::runner::{RunOutcome, SyncRunner};

pub struct SyncAdmin<S> {
    runner: Arc<SyncRunner<S>>,
    registry: Arc<ResourceRegistry>,
    history: Option<Arc<dyn RunHistoryRepository>>,
}

impl<S> SyncAdmin<S>
where
    S: SyncStateRepository,
{
    pub fn new(runner: Arc<SyncRunner<S>>, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            runner,
            registry,
            history: None,
        }
    }

    /// Read past runs from `history`, the same store the history sink writes.
    pub fn with_history(mut self, history: Arc<dyn RunHistoryRepository>) -> Self {
        self.history = Some(history);
        self
    }

    fn descriptor(&self, resource_type: &str) -> TributaryResult<Arc<ResourceDescriptor>> {
        self.registry
            .get(resource_type)
            .ok_or_else(|| TributaryError::NotFound(format!("resource type '{resource_type}'")))
    }

    /// Pause or resume scheduled runs of one key. A run already in flight is
    /// not interrupted.
    pub async fn set_enabled(
        &self,
        account_id: Uuid,
        resource_type: &str,
        enabled: bool,
    ) -> TributaryResult<SyncState> {
        self.descriptor(resource_type)?;
        let key = SyncKey::new(account_id, resource_type);
        let state = self.runner.store().set_enabled(&key, enabled).await?;
        tracing::info!(key = %key, enabled, "sync key toggled");
        Ok(state)
    }

    /// Run one key immediately, ignoring the interval gate. Disabled keys are
    /// refused; a key with a run in flight reports `Busy`.
    pub async fn run_now(&self, account_id: Uuid, resource_type: &str) -> TributaryResult<RunOutcome> {
        let descriptor = self.descriptor(resource_type)?;
        let key = SyncKey::new(account_id, resource_type);

        let state = self.runner.store().get_or_create(&key).await?;
        if !state.enabled {
            return Err(TributaryError::Validation(format!(
                "sync key {key} is disabled"
            )));
        }

        tracing::info!(key = %key, "manual sync run requested");
        self.runner.run(account_id, &descriptor).await
    }

    pub async fn state(&self, account_id: Uuid, resource_type: &str) -> TributaryResult<SyncState> {
        self.descriptor(resource_type)?;
        let key = SyncKey::new(account_id, resource_type);
        self.runner
            .store()
            .get(&key)
            .await?
            .ok_or_else(|| TributaryError::NotFound(format!("sync state for {key}")))
    }

    /// The last `limit` finished runs of one key, newest first.
    pub async fn history(
        &self,
        account_id: Uuid,
        resource_type: &str,
        limit: i64,
    ) -> TributaryResult<Vec<RunRecord>> {
        self.descriptor(resource_type)?;
        if limit <= 0 {
            return Err(TributaryError::Validation(format!(
                "history limit must be positive, got {limit}"
            )));
        }
        let history = self.history.as_ref().ok_or_else(|| {
            TributaryError::Config("run history is not configured".to_owned())
        })?;
        history
            .list_recent(&SyncKey::new(account_id, resource_type), limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FanoutEventSink, HistoryEventSink, RunEventSink};
    use crate::test_support::{RecordingSink, ScriptedAdapter};
    use tributary_config::SchedulerConfig;
    use tributary_db::history::memory::InMemoryRunHistoryRepository;
    use tributary_db::sync::memory::InMemorySyncStateRepository;
    use tributary_db::sync::models::{RunStatus, StartRun};

    fn admin() -> (SyncAdmin<InMemorySyncStateRepository>, Arc<InMemorySyncStateRepository>, Arc<ScriptedAdapter>) {
        let config = SchedulerConfig::default();
        let store = Arc::new(InMemorySyncStateRepository::new());
        let runner = Arc::new(
            SyncRunner::new(store.clone(), Arc::new(RecordingSink::default()), &config).unwrap(),
        );
        let adapter = Arc::new(ScriptedAdapter::empty());
        let mut registry = ResourceRegistry::new();
        registry
            .register(ResourceDescriptor::with_defaults("scripted", adapter.clone(), &config).unwrap())
            .unwrap();
        (SyncAdmin::new(runner, Arc::new(registry)), store, adapter)
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let (admin, _, _) = admin();
        let err = admin.run_now(Uuid::new_v4(), "invoices").await.unwrap_err();
        assert!(matches!(err, TributaryError::NotFound(_)));
        let err = admin
            .set_enabled(Uuid::new_v4(), "invoices", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TributaryError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_now_ignores_interval_gate() {
        let (admin, _, adapter) = admin();
        let account = Uuid::new_v4();

        for _ in 0..2 {
            match admin.run_now(account, "scripted").await.unwrap() {
                RunOutcome::Ran(run) => assert!(run.is_ok()),
                RunOutcome::Busy => panic!("lock should be free"),
            }
        }
        assert_eq!(adapter.calls(), 2);
        let state = admin.state(account, "scripted").await.unwrap();
        assert_eq!(state.last_status, Some(RunStatus::Ok));
    }

    #[tokio::test]
    async fn run_now_refuses_disabled_key() {
        let (admin, _, adapter) = admin();
        let account = Uuid::new_v4();
        let state = admin.set_enabled(account, "scripted", false).await.unwrap();
        assert!(!state.enabled);

        let err = admin.run_now(account, "scripted").await.unwrap_err();
        assert!(matches!(err, TributaryError::Validation(_)));
        assert_eq!(adapter.calls(), 0);

        admin.set_enabled(account, "scripted", true).await.unwrap();
        assert!(matches!(
            admin.run_now(account, "scripted").await.unwrap(),
            RunOutcome::Ran(_)
        ));
    }

    #[tokio::test]
    async fn run_now_respects_run_lock() {
        let (admin, store, adapter) = admin();
        let account = Uuid::new_v4();
        let held = store
            .try_start_run(&adapter.key(account), chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(held, StartRun::Started(_)));

        assert_eq!(
            admin.run_now(account, "scripted").await.unwrap(),
            RunOutcome::Busy
        );
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn state_of_unseen_key_is_not_found() {
        let (admin, _, _) = admin();
        let err = admin.state(Uuid::new_v4(), "scripted").await.unwrap_err();
        assert!(matches!(err, TributaryError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_lists_recorded_runs_newest_first() {
        let config = SchedulerConfig::default();
        let history = Arc::new(InMemoryRunHistoryRepository::new());
        let sink: Arc<dyn RunEventSink> = Arc::new(
            FanoutEventSink::new()
                .with(Arc::new(RecordingSink::default()))
                .with(Arc::new(HistoryEventSink::new(history.clone()))),
        );
        let store = Arc::new(InMemorySyncStateRepository::new());
        let runner = Arc::new(SyncRunner::new(store, sink, &config).unwrap());

        let ok = Arc::new(ScriptedAdapter::empty());
        let broken = Arc::new(ScriptedAdapter::failing("returns", "HTTP 502"));
        let mut registry = ResourceRegistry::new();
        registry
            .register(ResourceDescriptor::with_defaults("scripted", ok, &config).unwrap())
            .unwrap();
        registry
            .register(ResourceDescriptor::with_defaults("returns", broken, &config).unwrap())
            .unwrap();
        let admin = SyncAdmin::new(runner, Arc::new(registry)).with_history(history.clone());

        let account = Uuid::new_v4();
        for _ in 0..3 {
            admin.run_now(account, "scripted").await.unwrap();
        }
        admin.run_now(account, "returns").await.unwrap();

        let runs = admin.history(account, "scripted", 2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == "ok" && r.resource_type == "scripted"));
        assert!(runs[0].recorded_at >= runs[1].recorded_at);

        let failed = admin.history(account, "returns", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("fetch failed on page 1: HTTP 502"));
        assert_eq!(history.len(), 4);

        assert!(admin.history(Uuid::new_v4(), "scripted", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_rejects_bad_requests() {
        let (admin, _, _) = admin();
        let err = admin.history(Uuid::new_v4(), "scripted", 5).await.unwrap_err();
        assert!(matches!(err, TributaryError::Config(_)));

        let admin = admin.with_history(Arc::new(InMemoryRunHistoryRepository::new()));
        let err = admin.history(Uuid::new_v4(), "invoices", 5).await.unwrap_err();
        assert!(matches!(err, TributaryError::NotFound(_)));
        let err = admin.history(Uuid::new_v4(), "scripted", 0).await.unwrap_err();
        assert!(matches!(err, TributaryError::Validation(_)));
    }
}
