//! Hand-written collaborators shared by the runner, scheduler and admin tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use tributary_common::error::{TributaryError, TributaryResult};
use tributary_common::SyncKey;
use tributary_db::accounts::repositories::AccountRepository;
use tributary_db::items::memory::InMemoryItemRepository;
use tributary_db::items::repositories::ItemRepository;

use crate::adapter::{AdapterError, NormalizedItem, Page, ResourceAdapter};
use crate::events::{RunEvent, RunEventSink};
use crate::window::SyncWindow;

/// What the adapter does when asked for one page.
#[derive(Debug, Clone)]
pub enum Step {
    Items(Vec<NormalizedItem>),
    Fail(String),
    Panic,
    /// Hands back the token it was called with.
    Stall,
}

/// Adapter replaying a fixed list of pages. Page `n` is reached with the
/// token `page-n`; the script is stateless across runs, so every run sees the
/// same pages.
pub struct ScriptedAdapter {
    resource_type: String,
    steps: Vec<Step>,
    failing_accounts: HashSet<Uuid>,
    delay: Option<Duration>,
    fail_upsert: bool,
    pub items: Arc<InMemoryItemRepository>,
    pub fetch_calls: AtomicUsize,
    pub windows: Mutex<Vec<SyncWindow>>,
    /// Account of every fetch, in call order.
    pub accounts_seen: Mutex<Vec<Uuid>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(resource_type: &str, steps: Vec<Step>) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            steps,
            failing_accounts: HashSet::new(),
            delay: None,
            fail_upsert: false,
            items: Arc::new(InMemoryItemRepository::new()),
            fetch_calls: AtomicUsize::new(0),
            windows: Mutex::new(Vec::new()),
            accounts_seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// A source with no changes: one empty last page.
    pub fn empty() -> Self {
        Self::new("scripted", vec![Step::Items(Vec::new())])
    }

    pub fn pages(resource_type: &str, pages: Vec<Vec<NormalizedItem>>) -> Self {
        Self::new(resource_type, pages.into_iter().map(Step::Items).collect())
    }

    pub fn failing(resource_type: &str, message: &str) -> Self {
        Self::new(resource_type, vec![Step::Fail(message.to_owned())])
    }

    /// Fail every fetch for `account_id`; other accounts follow the script.
    pub fn fail_for(mut self, account_id: Uuid) -> Self {
        self.failing_accounts.insert(account_id);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failing_upsert(mut self) -> Self {
        self.fail_upsert = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn key(&self, account_id: Uuid) -> SyncKey {
        SyncKey::new(account_id, self.resource_type.clone())
    }
}

fn page_index(token: Option<&str>) -> usize {
    token
        .and_then(|t| t.strip_prefix("page-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl ResourceAdapter for ScriptedAdapter {
    async fn fetch_page(
        &self,
        account_id: Uuid,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> Result<Page, AdapterError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(*window);
        self.accounts_seen.lock().unwrap().push(account_id);

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing_accounts.contains(&account_id) {
            return Err(AdapterError::Fetch(format!(
                "scripted failure for account {account_id}"
            )));
        }

        let index = page_index(page_token);
        let next = (index + 1 < self.steps.len()).then(|| format!("page-{}", index + 1));
        match self.steps.get(index) {
            Some(Step::Items(items)) => Ok(Page {
                items: items.clone(),
                next_page_token: next,
            }),
            Some(Step::Fail(message)) => Err(AdapterError::Fetch(message.clone())),
            Some(Step::Panic) => panic!("scripted adapter panic"),
            Some(Step::Stall) => Ok(Page::with_next(
                Vec::new(),
                page_token.unwrap_or("page-0").to_owned(),
            )),
            None => Ok(Page::default()),
        }
    }

    async fn upsert(
        &self,
        account_id: Uuid,
        items: &[NormalizedItem],
    ) -> Result<usize, AdapterError> {
        if self.fail_upsert {
            return Err(AdapterError::Upsert("unique violation".to_owned()));
        }
        self.items
            .upsert_items(&self.key(account_id), items)
            .await
            .map_err(|e| AdapterError::Upsert(e.to_string()))
    }
}

pub fn items(prefix: &str, count: usize) -> Vec<NormalizedItem> {
    (0..count)
        .map(|i| NormalizedItem::new(format!("{prefix}-{i}"), serde_json::json!({ "seq": i })))
        .collect()
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunEventSink for RecordingSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub struct StaticAccounts {
    pub accounts: Vec<Uuid>,
    pub fail: bool,
}

impl StaticAccounts {
    pub fn new(accounts: Vec<Uuid>) -> Self {
        Self {
            accounts,
            fail: false,
        }
    }
}

#[async_trait]
impl AccountRepository for StaticAccounts {
    async fn list_active_accounts(&self) -> TributaryResult<Vec<Uuid>> {
        if self.fail {
            return Err(TributaryError::Database("connection refused".to_owned()));
        }
        Ok(self.accounts.clone())
    }
}
