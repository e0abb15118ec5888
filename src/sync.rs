use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, IssuePage, PageRequest, PageToken};
use crate::config::SyncConfig;
use crate::detect::{classify, Change, DetectionStrategy};
use crate::error::SyncError;
use crate::retry::Governor;
use crate::store::{LocalStore, StoreError};
use crate::types::{IssueKey, IssueState, LocalIssueRecord, RemoteIssue, Revision, Scope, SyncCursor};

/// Where a pass currently stands
#[derive(Debug)]
enum PassState {
    /// Nothing fetched yet; the stored cursor is about to be read
    Idle,
    Fetching {
        page_no: u32,
        since: Option<DateTime<Utc>>,
        token: Option<PageToken>,
    },
    Reconciling {
        page_no: u32,
        since: Option<DateTime<Utc>>,
        page: IssuePage,
    },
    /// All pages consumed
    Completed,
    Failed(SyncError),
}

/// What the remote reported during this pass, last-write-wins by marker
#[derive(Debug, Default)]
struct Observed {
    issues: HashMap<u64, (Revision, IssueState)>,
    latest_update: Option<DateTime<Utc>>,
}

impl Observed {
    /// Whether this exact snapshot was already handled earlier in the pass
    fn has_seen(&self, issue: &RemoteIssue) -> bool {
        self.issues
            .get(&issue.number)
            .is_some_and(|(revision, _)| *revision == issue.revision)
    }

    fn record(&mut self, issue: &RemoteIssue) {
        match self.issues.get(&issue.number) {
            Some((revision, _)) if *revision > issue.revision => {}
            _ => {
                self.issues
                    .insert(issue.number, (issue.revision, issue.state));
            }
        }

        if self.latest_update.map_or(true, |latest| issue.updated_at > latest) {
            self.latest_update = Some(issue.updated_at);
        }
    }

    fn open_numbers(&self) -> BTreeSet<u64> {
        self.issues
            .iter()
            .filter(|(_, (_, state))| state.is_open())
            .map(|(number, _)| *number)
            .collect()
    }
}

/// Drives one sync pass for one scope: fetch every page, apply the detected
/// changes, then close what disappeared and advance the cursor.
///
/// Pages are walked by keyset over the ascending `updated_at` listing: each
/// page with a successor restarts the listing at its last item's timestamp.
/// An issue edited mid-pass moves to the end of the listing and is seen
/// again, while page-number offsets would let the next issue slide past.
///
/// The cursor is written only once every page has been applied. A failed or
/// cancelled pass leaves it untouched; writes already applied stay in place
/// and are reclassified as unchanged by the next pass.
pub struct Reconciler<'a, B: ?Sized, S: ?Sized> {
    backend: &'a B,
    store: &'a Arc<S>,
    governor: &'a Governor,
    config: &'a SyncConfig,
}

impl<'a, B, S> Reconciler<'a, B, S>
where
    B: Backend + ?Sized,
    S: LocalStore + ?Sized + 'static,
{
    pub fn new(
        backend: &'a B,
        store: &'a Arc<S>,
        governor: &'a Governor,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            backend,
            store,
            governor,
            config,
        }
    }

    pub async fn run(&self, scope: &Scope, cancel: &CancellationToken) -> SyncResult {
        let mut result = SyncResult::new(scope.clone());
        let mut observed = Observed::default();
        let mut previous: Option<SyncCursor> = None;
        let mut state = PassState::Idle;

        loop {
            state = match state {
                PassState::Idle => match self.store.get_cursor(scope).await {
                    Ok(cursor) => {
                        previous = cursor;
                        result.full_scan = cursor.is_none() || self.config.force_full_scan;
                        let since = if result.full_scan {
                            None
                        } else {
                            cursor.map(|c| c.synced_through)
                        };

                        tracing::info!(
                            scope = %scope,
                            full_scan = result.full_scan,
                            since = ?since,
                            "Starting sync pass"
                        );
                        PassState::Fetching {
                            page_no: 1,
                            since,
                            token: None,
                        }
                    }
                    Err(e) => PassState::Failed(e.into()),
                },

                PassState::Fetching {
                    page_no,
                    since,
                    token,
                } => {
                    if cancel.is_cancelled() {
                        PassState::Failed(SyncError::Cancelled)
                    } else {
                        let request = PageRequest {
                            since,
                            page: token,
                            per_page: self.config.per_page,
                        };
                        match self.governor.fetch_page(self.backend, scope, &request).await {
                            Ok(page) => PassState::Reconciling {
                                page_no,
                                since,
                                page,
                            },
                            Err(e) => PassState::Failed(e),
                        }
                    }
                }

                PassState::Reconciling {
                    page_no,
                    since,
                    page,
                } => {
                    let IssuePage {
                        items, next_page, ..
                    } = page;
                    let last_update = items.last().map(|issue| issue.updated_at);
                    result.pages = page_no;
                    tracing::debug!(scope = %scope, page = page_no, count = items.len(), "Fetched page");

                    match self.apply_page(scope, items, &mut observed, &mut result).await {
                        Ok(()) => match next_page {
                            Some(token) => {
                                let (since, token) = next_request(since, last_update, token);
                                PassState::Fetching {
                                    page_no: page_no + 1,
                                    since,
                                    token,
                                }
                            }
                            None => PassState::Completed,
                        },
                        Err(e) => PassState::Failed(e),
                    }
                }

                PassState::Completed => {
                    match self.complete(scope, previous, &observed, &mut result).await {
                        Ok(cursor) => {
                            result.cursor = cursor;
                            tracing::info!(
                                scope = %scope,
                                pages = result.pages,
                                created = result.created,
                                updated = result.updated,
                                closed = result.closed,
                                unchanged = result.unchanged,
                                "Sync pass completed"
                            );
                            return result;
                        }
                        Err(e) => PassState::Failed(e),
                    }
                }

                PassState::Failed(e) => {
                    tracing::error!(scope = %scope, pages = result.pages, error = %e, "Sync pass failed");
                    result.cursor = previous;
                    result.error = Some(e);
                    return result;
                }
            };
        }
    }

    /// Apply one page's changes. Distinct issues are looked up concurrently,
    /// then written as one batch.
    async fn apply_page(
        &self,
        scope: &Scope,
        items: Vec<RemoteIssue>,
        observed: &mut Observed,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        // One write per issue: duplicates within a page keep the newest marker
        let mut latest: BTreeMap<u64, RemoteIssue> = BTreeMap::new();
        for issue in items {
            if observed.has_seen(&issue) {
                continue;
            }
            observed.record(&issue);
            match latest.get(&issue.number) {
                Some(kept) if kept.revision >= issue.revision => {
                    tracing::debug!(scope = %scope, issue = issue.number, "Dropping stale duplicate");
                }
                _ => {
                    latest.insert(issue.number, issue);
                }
            }
        }

        let permits = Arc::new(Semaphore::new(self.config.write_concurrency));
        let mut lookups = JoinSet::new();
        for issue in latest.into_values() {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Task(e.to_string()))?;
            let store = Arc::clone(self.store);
            let scope = scope.clone();
            let strategy = self.config.detection;

            lookups.spawn(async move {
                let _permit = permit;
                plan_write(store.as_ref(), &scope, issue, strategy).await
            });
        }

        let mut changes = Vec::new();
        let mut writes = Vec::new();
        let mut first_error = None;
        while let Some(joined) = lookups.join_next().await {
            let outcome = joined
                .map_err(SyncError::from)
                .and_then(|r| r.map_err(SyncError::from));
            match outcome {
                Ok((change, record)) => {
                    changes.push(change);
                    writes.extend(record);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if !writes.is_empty() {
            writes.sort_by_key(|record| record.number);
            tracing::trace!(scope = %scope, count = writes.len(), "Writing records");
            self.store.upsert_many(writes).await?;
        }
        for change in changes {
            result.count(change);
        }
        Ok(())
    }

    /// Close issues a full scan no longer reports as open, then persist the cursor.
    async fn complete(
        &self,
        scope: &Scope,
        previous: Option<SyncCursor>,
        observed: &Observed,
        result: &mut SyncResult,
    ) -> Result<Option<SyncCursor>, SyncError> {
        // An incremental listing omits unchanged issues, so absence only
        // means something after a full scan
        if result.full_scan {
            let open_locally = self.store.list_open_identifiers(scope).await?;
            let observed_open = observed.open_numbers();

            let mut closures = Vec::new();
            for number in open_locally.difference(&observed_open) {
                let key = IssueKey::new(scope.clone(), *number);
                let Some(mut record) = self.store.get(&key).await? else {
                    continue;
                };
                record.mark_closed_elsewhere(Utc::now());
                tracing::warn!(issue = %key, "Closed locally: no longer open on remote");
                closures.push(record);
            }

            if !closures.is_empty() {
                let count = closures.len();
                self.store.upsert_many(closures).await?;
                result.closed += count;
            }
        }

        let Some(cursor) = next_cursor(previous, observed.latest_update) else {
            return Ok(None);
        };
        self.store.set_cursor(scope, cursor).await?;
        Ok(Some(cursor))
    }
}

/// Classify one issue against the store and build the record to write, if any
async fn plan_write<S: LocalStore + ?Sized>(
    store: &S,
    scope: &Scope,
    issue: RemoteIssue,
    strategy: DetectionStrategy,
) -> Result<(Change, Option<LocalIssueRecord>), StoreError> {
    let key = IssueKey::new(scope.clone(), issue.number);
    let local = store.get(&key).await?;
    let change = classify(&issue, local.as_ref(), strategy);

    let record = match change {
        Change::Created | Change::Updated => {
            tracing::trace!(issue = %key, change = ?change, revision = %issue.revision, "Planned write");
            Some(LocalIssueRecord::from_remote(scope, &issue, Utc::now()))
        }
        Change::Unchanged => None,
    };

    Ok((change, record))
}

/// Parameters of the request following a page that has a successor.
///
/// Restarts the listing at the last item's timestamp. Only a page whose
/// items all share the current `since` (more equal timestamps than fit in a
/// page) falls back to the remote's page token.
fn next_request(
    since: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    token: PageToken,
) -> (Option<DateTime<Utc>>, Option<PageToken>) {
    match last_update {
        Some(last) if Some(last) > since => (Some(last), None),
        _ => (since, Some(token)),
    }
}

/// Cursor after a completed pass: never older than the previous one.
///
/// `None` only when there is neither a previous cursor nor any observed
/// issue, in which case the next pass is a full scan again.
fn next_cursor(
    previous: Option<SyncCursor>,
    latest_update: Option<DateTime<Utc>>,
) -> Option<SyncCursor> {
    let observed = latest_update.map(SyncCursor::new);
    match (previous, observed) {
        (Some(previous), Some(observed)) => Some(previous.max(observed)),
        (previous, observed) => previous.or(observed),
    }
}

/// Summary of one sync pass
#[derive(Debug)]
pub struct SyncResult {
    pub scope: Scope,
    /// Whether the pass listed every issue (enables closure detection)
    pub full_scan: bool,
    pub pages: u32,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub closed: usize,
    /// Cursor in effect after the pass; the previous one when the pass failed
    pub cursor: Option<SyncCursor>,
    /// First fatal error, if the pass failed
    pub error: Option<SyncError>,
}

impl SyncResult {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            full_scan: false,
            pages: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            closed: 0,
            cursor: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of records written by the pass
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.closed
    }

    fn count(&mut self, change: Change) {
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }

    pub fn print_summary(&self) {
        let mode = if self.full_scan { "full" } else { "incremental" };
        println!("\n=== {} ({} scan) ===", self.scope, mode);

        println!("  Pages fetched: {}", self.pages);
        println!("  Created:   {}", self.created);
        println!("  Updated:   {}", self.updated);
        println!("  Closed:    {}", self.closed);
        println!("  Unchanged: {}", self.unchanged);

        match &self.cursor {
            Some(cursor) => println!("  Cursor:    {}", cursor.synced_through.to_rfc3339()),
            None => println!("  Cursor:    (none)"),
        }

        if let Some(error) = &self.error {
            println!("\n  FAILED: {}", error);
            println!("  Cursor left unchanged; the next run resumes from it.");
        }
    }
}
