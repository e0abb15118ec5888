mod common;

use std::sync::Arc;

use common::{base_time, issue, test_config, widgets, EditAfterFirstPage, FakeTracker, ScriptedPages};
use issuesync::backend::BackendError;
use issuesync::store::{LocalStore, MemoryStore};
use issuesync::types::IssueKey;
use issuesync::{IssueState, LocalIssueRecord, Revision, SyncConfig, SyncCursor, SyncError, SyncSession};

fn session(
    tracker: &Arc<FakeTracker>,
    store: &Arc<MemoryStore>,
) -> SyncSession<Arc<FakeTracker>, MemoryStore> {
    SyncSession::with_config(Arc::clone(tracker), Arc::clone(store), test_config())
}

fn full_scan_session(
    tracker: &Arc<FakeTracker>,
    store: &Arc<MemoryStore>,
) -> SyncSession<Arc<FakeTracker>, MemoryStore> {
    let config = SyncConfig {
        force_full_scan: true,
        ..test_config()
    };
    SyncSession::with_config(Arc::clone(tracker), Arc::clone(store), config)
}

async fn record(store: &MemoryStore, number: u64) -> Option<LocalIssueRecord> {
    store.get(&IssueKey::new(widgets(), number)).await.unwrap()
}

#[tokio::test]
async fn test_first_pass_creates_every_issue() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=5 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());

    let result = session(&tracker, &store).run_sync_pass(&widgets()).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert!(result.full_scan);
    // Each restart re-lists the previous page's last issue
    assert_eq!(result.pages, 4);
    assert_eq!(result.created, 5);
    assert_eq!(result.unchanged, 0);
    assert_eq!(result.updated, 0);
    assert_eq!(result.closed, 0);
    assert_eq!(
        result.cursor,
        Some(SyncCursor::new(base_time() + chrono::Duration::minutes(5)))
    );
    assert_eq!(store.get_cursor(&widgets()).await.unwrap(), result.cursor);
    assert_eq!(store.len().await, 5);
}

#[tokio::test]
async fn test_second_pass_without_remote_changes_is_a_no_op() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=5 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());
    let session = session(&tracker, &store);

    let first = session.run_sync_pass(&widgets()).await;
    let second = session.run_sync_pass(&widgets()).await;

    assert!(second.is_success());
    assert!(!second.full_scan);
    assert_eq!(second.changes(), 0);
    assert_eq!(second.cursor, first.cursor);
}

#[tokio::test]
async fn test_incremental_pass_applies_remote_edits() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=5 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());
    let session = session(&tracker, &store);
    let first = session.run_sync_pass(&widgets()).await;
    let calls_before = tracker.calls() as usize;

    tracker.put(&widgets(), issue(2, IssueState::Closed, 10));
    tracker.put(&widgets(), issue(6, IssueState::Open, 11));
    let second = session.run_sync_pass(&widgets()).await;

    assert!(second.is_success());
    assert_eq!(second.created, 1);
    assert_eq!(second.updated, 1);
    assert_eq!(second.unchanged, 1);

    let (_, opening_request) = tracker.requests()[calls_before].clone();
    assert_eq!(opening_request.since, first.cursor.map(|c| c.synced_through));

    assert_eq!(record(&store, 2).await.unwrap().state, IssueState::Closed);
    assert!(second.cursor > first.cursor);
}

#[tokio::test]
async fn test_full_scan_closes_issues_missing_from_remote() {
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new());
    for n in 1..=3 {
        let seeded = LocalIssueRecord::from_remote(&widgets(), &issue(n, IssueState::Open, 0), base_time());
        store.upsert(seeded).await.unwrap();
    }

    tracker.put(&widgets(), issue(1, IssueState::Open, 0));
    let mut retitled = issue(2, IssueState::Open, 1);
    retitled.title = "Retitled upstream".to_string();
    tracker.put(&widgets(), retitled);

    let result = session(&tracker, &store).run_sync_pass(&widgets()).await;

    assert!(result.is_success());
    assert!(result.full_scan);
    assert_eq!(result.closed, 1);
    assert_eq!(result.updated, 1);
    assert_eq!(result.unchanged, 1);

    let a = record(&store, 1).await.unwrap();
    let b = record(&store, 2).await.unwrap();
    let c = record(&store, 3).await.unwrap();
    assert_eq!(a.state, IssueState::Open);
    assert_eq!(b.state, IssueState::Open);
    assert_eq!(b.title, "Retitled upstream");
    assert_eq!(c.state, IssueState::Closed);
    assert!(c.closed_elsewhere);
    assert_eq!(c.revision, Revision(base_time()));
}

#[tokio::test]
async fn test_incremental_pass_does_not_close_unlisted_issues() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=3 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());
    session(&tracker, &store).run_sync_pass(&widgets()).await;

    tracker.remove(&widgets(), 1);
    let incremental = session(&tracker, &store).run_sync_pass(&widgets()).await;
    assert!(incremental.is_success());
    assert_eq!(incremental.closed, 0);
    assert_eq!(record(&store, 1).await.unwrap().state, IssueState::Open);

    let full = full_scan_session(&tracker, &store)
        .run_sync_pass(&widgets())
        .await;
    assert!(full.is_success());
    assert!(full.full_scan);
    assert_eq!(full.closed, 1);
    assert_eq!(record(&store, 1).await.unwrap().state, IssueState::Closed);
}

#[tokio::test]
async fn test_fatal_page_failure_keeps_cursor_and_prior_writes() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=4 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    tracker.fail_page(
        2,
        BackendError::Auth {
            message: "Bad credentials".to_string(),
        },
    );
    let store = Arc::new(MemoryStore::new());
    let session = session(&tracker, &store);

    let failed = session.run_sync_pass(&widgets()).await;

    assert!(!failed.is_success());
    assert!(matches!(
        failed.error,
        Some(SyncError::Backend(BackendError::Auth { .. }))
    ));
    assert_eq!(failed.pages, 1);
    assert_eq!(failed.created, 2);
    assert!(failed.cursor.is_none());
    assert!(store.get_cursor(&widgets()).await.unwrap().is_none());
    assert!(record(&store, 1).await.is_some());
    assert!(record(&store, 2).await.is_some());
    assert!(record(&store, 3).await.is_none());

    // Re-running from the untouched cursor finishes the job
    tracker.clear_failures();
    let retried = session.run_sync_pass(&widgets()).await;
    assert!(retried.is_success());
    assert!(retried.full_scan);
    assert_eq!(retried.created, 2);
    assert_eq!(retried.unchanged, 2);
}

#[tokio::test]
async fn test_failed_incremental_pass_leaves_previous_cursor() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=2 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());
    let session = session(&tracker, &store);
    let first = session.run_sync_pass(&widgets()).await;
    assert!(first.is_success());

    for n in 3..=5 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    tracker.fail_page(2, BackendError::api("Validation Failed"));
    let second = session.run_sync_pass(&widgets()).await;

    assert!(matches!(second.error, Some(SyncError::Backend(_))));
    assert_eq!(second.cursor, first.cursor);
    assert_eq!(store.get_cursor(&widgets()).await.unwrap(), first.cursor);
    assert!(record(&store, 3).await.is_some());
    assert!(record(&store, 4).await.is_none());
}

#[tokio::test]
async fn test_newer_local_state_is_never_regressed() {
    let tracker = Arc::new(FakeTracker::new());
    let store = Arc::new(MemoryStore::new());

    let mut local = LocalIssueRecord::from_remote(&widgets(), &issue(1, IssueState::Closed, 10), base_time());
    local.title = "Edited after the remote snapshot".to_string();
    store.upsert(local.clone()).await.unwrap();

    tracker.put(&widgets(), issue(1, IssueState::Open, 5));
    let result = session(&tracker, &store).run_sync_pass(&widgets()).await;

    assert!(result.is_success());
    assert_eq!(result.unchanged, 1);
    assert_eq!(record(&store, 1).await.unwrap(), local);
}

#[tokio::test]
async fn test_newest_marker_wins_across_drifting_pages() {
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedPages::new(vec![
        vec![issue(1, IssueState::Open, 8), issue(2, IssueState::Open, 2)],
        vec![issue(1, IssueState::Closed, 4)],
    ]);

    let result = SyncSession::with_config(backend, Arc::clone(&store), test_config())
        .run_sync_pass(&widgets())
        .await;

    assert!(result.is_success());
    assert_eq!(result.created, 2);
    assert_eq!(result.unchanged, 1);
    let kept = record(&store, 1).await.unwrap();
    assert_eq!(kept.revision, issue(1, IssueState::Open, 8).revision);
    assert_eq!(kept.state, IssueState::Open);
}

#[tokio::test]
async fn test_later_newer_snapshot_replaces_earlier_page() {
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedPages::new(vec![
        vec![issue(1, IssueState::Open, 4)],
        vec![issue(1, IssueState::Closed, 9)],
    ]);

    let result = SyncSession::with_config(backend, Arc::clone(&store), test_config())
        .run_sync_pass(&widgets())
        .await;

    assert!(result.is_success());
    assert_eq!(result.created, 1);
    assert_eq!(result.updated, 1);
    assert_eq!(record(&store, 1).await.unwrap().state, IssueState::Closed);
    // Closed upstream, so not counted as closed elsewhere
    assert_eq!(result.closed, 0);
}

#[tokio::test]
async fn test_duplicates_within_a_page_collapse_to_newest() {
    let store = Arc::new(MemoryStore::new());
    let backend = ScriptedPages::new(vec![vec![
        issue(1, IssueState::Open, 3),
        issue(1, IssueState::Closed, 7),
        issue(1, IssueState::Open, 5),
    ]]);

    let result = SyncSession::with_config(backend, Arc::clone(&store), test_config())
        .run_sync_pass(&widgets())
        .await;

    assert!(result.is_success());
    assert_eq!(result.created, 1);
    assert_eq!(result.changes(), 1);
    let kept = record(&store, 1).await.unwrap();
    assert_eq!(kept.revision, issue(1, IssueState::Closed, 7).revision);
    assert_eq!(
        result.cursor,
        Some(SyncCursor::new(base_time() + chrono::Duration::minutes(7)))
    );
}

#[tokio::test]
async fn test_reopened_issue_is_an_ordinary_update() {
    let tracker = Arc::new(FakeTracker::new());
    for n in 1..=2 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    let store = Arc::new(MemoryStore::new());
    session(&tracker, &store).run_sync_pass(&widgets()).await;

    tracker.remove(&widgets(), 2);
    let full = full_scan_session(&tracker, &store)
        .run_sync_pass(&widgets())
        .await;
    assert_eq!(full.closed, 1);

    tracker.put(&widgets(), issue(2, IssueState::Open, 20));
    let reopened = session(&tracker, &store).run_sync_pass(&widgets()).await;

    assert!(reopened.is_success());
    assert_eq!(reopened.updated, 1);
    let record = record(&store, 2).await.unwrap();
    assert_eq!(record.state, IssueState::Open);
    assert!(!record.closed_elsewhere);
}

#[tokio::test]
async fn test_issue_edited_between_pages_is_not_skipped() {
    let tracker = FakeTracker::new();
    for n in 1..=4 {
        tracker.put(&widgets(), issue(n, IssueState::Open, n as i64));
    }
    // Issue 1 moves to the end of the listing once page 1 has been served
    let backend = EditAfterFirstPage::new(tracker, |remote: &FakeTracker| {
        remote.put(&widgets(), issue(1, IssueState::Open, 10));
    });
    let store = Arc::new(MemoryStore::new());

    let result = SyncSession::with_config(backend, Arc::clone(&store), test_config())
        .run_sync_pass(&widgets())
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.created, 4);
    assert_eq!(result.updated, 1);
    for n in 1..=4 {
        assert!(record(&store, n).await.is_some(), "issue {} never synced", n);
    }
    assert_eq!(record(&store, 1).await.unwrap().revision, issue(1, IssueState::Open, 10).revision);
    assert_eq!(
        result.cursor,
        Some(SyncCursor::new(base_time() + chrono::Duration::minutes(10)))
    );
}

#[tokio::test]
async fn test_drift_during_full_scan_closes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let tracker = FakeTracker::new();
    for n in 1..=4 {
        let remote = issue(n, IssueState::Open, n as i64);
        store
            .upsert(LocalIssueRecord::from_remote(&widgets(), &remote, base_time()))
            .await
            .unwrap();
        tracker.put(&widgets(), remote);
    }
    let backend = EditAfterFirstPage::new(tracker, |remote: &FakeTracker| {
        remote.put(&widgets(), issue(2, IssueState::Open, 10));
    });

    let result = SyncSession::with_config(backend, Arc::clone(&store), test_config())
        .run_sync_pass(&widgets())
        .await;

    assert!(result.is_success());
    assert!(result.full_scan);
    assert_eq!(result.closed, 0);
    assert_eq!(result.updated, 1);
    let third = record(&store, 3).await.unwrap();
    assert_eq!(third.state, IssueState::Open);
    assert!(!third.closed_elsewhere);
}
