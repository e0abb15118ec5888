#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use issuesync::backend::{Backend, BackendError, IssuePage, PageRequest, PageToken, RateLimitInfo};
use issuesync::config::SyncConfig;
use issuesync::retry::RetryConfig;
use issuesync::{IssueState, RemoteIssue, Revision, Scope};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
}

/// Remote snapshot last modified `minute` minutes after [`base_time`]
pub fn issue(number: u64, state: IssueState, minute: i64) -> RemoteIssue {
    let at = base_time() + Duration::minutes(minute);
    RemoteIssue {
        number,
        title: format!("Issue {}", number),
        body: format!("Body of issue {}", number),
        state,
        labels: ["triage".to_string()].into_iter().collect(),
        assignees: Default::default(),
        updated_at: at,
        revision: Revision(at),
    }
}

pub fn widgets() -> Scope {
    Scope::new("acme", "widgets")
}

pub fn gadgets() -> Scope {
    Scope::new("acme", "gadgets")
}

/// Small pages and fast, deterministic backoff
pub fn test_config() -> SyncConfig {
    SyncConfig {
        per_page: 2,
        write_concurrency: 4,
        retry: RetryConfig::new(
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(100),
            3,
        )
        .with_jitter(false),
        ..SyncConfig::default()
    }
}

/// In-memory stand-in for a remote tracker.
///
/// Lists issues ordered by `updated_at`, honours `since` (inclusive) and
/// paginates by page number the way GitHub does.
#[derive(Default)]
pub struct FakeTracker {
    issues: Mutex<HashMap<Scope, Vec<RemoteIssue>>>,
    /// Number of pages served so far, across all passes
    served: AtomicU32,
    /// Once `served` reaches the threshold, every request fails with the error
    failure: Mutex<Option<(u32, BackendError)>>,
    /// Errors returned by the next calls, before normal service resumes
    queued_errors: Mutex<VecDeque<BackendError>>,
    rate_limit: Mutex<Option<RateLimitInfo>>,
    requests: Mutex<Vec<(Scope, PageRequest)>>,
    calls: AtomicU32,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an issue on the remote
    pub fn put(&self, scope: &Scope, issue: RemoteIssue) {
        let mut issues = self.issues.lock().unwrap();
        let list = issues.entry(scope.clone()).or_default();
        list.retain(|i| i.number != issue.number);
        list.push(issue);
    }

    pub fn remove(&self, scope: &Scope, number: u64) {
        if let Some(list) = self.issues.lock().unwrap().get_mut(scope) {
            list.retain(|i| i.number != number);
        }
    }

    /// Fail the `nth` page served from now on (1-based), and every request after it
    pub fn fail_page(&self, nth: u32, error: BackendError) {
        let threshold = self.served.load(Ordering::SeqCst) + nth - 1;
        *self.failure.lock().unwrap() = Some((threshold, error));
    }

    pub fn clear_failures(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn queue_error(&self, error: BackendError) {
        self.queued_errors.lock().unwrap().push_back(error);
    }

    pub fn report_rate_limit(&self, info: RateLimitInfo) {
        *self.rate_limit.lock().unwrap() = Some(info);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Scope, PageRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for FakeTracker {
    async fn list_issues(
        &self,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((scope.clone(), request.clone()));

        if let Some(error) = self.queued_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        if let Some((threshold, error)) = &*self.failure.lock().unwrap() {
            if self.served.load(Ordering::SeqCst) >= *threshold {
                return Err(error.clone());
            }
        }

        let page: u32 = match &request.page {
            Some(token) => token.0.parse().unwrap(),
            None => 1,
        };

        let mut matching: Vec<RemoteIssue> = self
            .issues
            .lock()
            .unwrap()
            .get(scope)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|i| request.since.map_or(true, |since| i.updated_at >= since))
            .collect();
        matching.sort_by_key(|i| (i.updated_at, i.number));

        let per_page = request.per_page as usize;
        let start = (page as usize - 1) * per_page;
        let items: Vec<RemoteIssue> = matching.iter().skip(start).take(per_page).cloned().collect();
        let next_page = (start + per_page < matching.len()).then(|| PageToken((page + 1).to_string()));
        self.served.fetch_add(1, Ordering::SeqCst);

        Ok(IssuePage {
            items,
            next_page,
            rate_limit: *self.rate_limit.lock().unwrap(),
        })
    }
}

/// Serves a fixed list of pages in call order, whatever the request
pub struct ScriptedPages {
    pages: Vec<Vec<RemoteIssue>>,
    next: AtomicUsize,
}

impl ScriptedPages {
    pub fn new(pages: Vec<Vec<RemoteIssue>>) -> Self {
        Self {
            pages,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Backend for ScriptedPages {
    async fn list_issues(
        &self,
        _scope: &Scope,
        _request: &PageRequest,
    ) -> Result<IssuePage, BackendError> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let next_page = (index + 1 < self.pages.len()).then(|| PageToken((index + 1).to_string()));

        Ok(IssuePage {
            items: self.pages[index].clone(),
            next_page,
            rate_limit: None,
        })
    }
}

/// Runs `edit` against the inner tracker once, right after the first page is served
pub struct EditAfterFirstPage<F> {
    pub inner: FakeTracker,
    edit: Mutex<Option<F>>,
}

impl<F> EditAfterFirstPage<F>
where
    F: FnOnce(&FakeTracker) + Send,
{
    pub fn new(inner: FakeTracker, edit: F) -> Self {
        Self {
            inner,
            edit: Mutex::new(Some(edit)),
        }
    }
}

#[async_trait]
impl<F> Backend for EditAfterFirstPage<F>
where
    F: FnOnce(&FakeTracker) + Send,
{
    async fn list_issues(
        &self,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, BackendError> {
        let page = self.inner.list_issues(scope, request).await;
        let edit = self.edit.lock().unwrap().take();
        if let Some(edit) = edit {
            edit(&self.inner);
        }
        page
    }
}
