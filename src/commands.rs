use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use issuesync::backend::github::GitHubBackend;
use issuesync::store::{LocalStore, MemoryStore, YamlFileStore};
use issuesync::{IssueState, Scope, SyncConfig, SyncSession};

fn parse_scopes(repos: &[String]) -> Result<Vec<Scope>> {
    let mut scopes: Vec<Scope> = repos
        .iter()
        .map(|r| r.parse::<Scope>())
        .collect::<Result<_, _>>()?;
    scopes.sort();
    scopes.dedup();
    Ok(scopes)
}

/// Copy what the file store holds for `scopes` into a throwaway store
async fn snapshot_store(store: &YamlFileStore, scopes: &[Scope]) -> Result<MemoryStore> {
    let snapshot = MemoryStore::new();
    for scope in scopes {
        snapshot.upsert_many(store.list_records(scope).await?).await?;
        if let Some(cursor) = store.get_cursor(scope).await? {
            snapshot.set_cursor(scope, cursor).await?;
        }
    }
    Ok(snapshot)
}

/// Cancel in-flight passes on Ctrl+C; they stop at the next page boundary
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Shutdown requested, stopping after the current page");
            cancel.cancel();
        }
    });
}

/// Execute the sync command
pub async fn sync(
    config_path: &Path,
    store_path: &Path,
    github_token: &str,
    repos: &[String],
    dry_run: bool,
    full: bool,
) -> Result<()> {
    let mut config = SyncConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if full {
        config.force_full_scan = true;
    }

    let scopes = parse_scopes(repos)?;

    let file_store = YamlFileStore::open(store_path)
        .await
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;
    let store: Arc<dyn LocalStore> = if dry_run {
        println!("DRY RUN: the store will not be modified\n");
        Arc::new(snapshot_store(&file_store, &scopes).await?)
    } else {
        Arc::new(file_store)
    };

    let backend = GitHubBackend::new(github_token)?;
    let session = Arc::new(SyncSession::with_config(backend, store, config));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut passes = JoinSet::new();
    for scope in scopes {
        let session = Arc::clone(&session);
        let cancel = cancel.child_token();
        passes.spawn(async move { session.run_sync_pass_with_cancel(&scope, cancel).await });
    }

    let mut results = Vec::new();
    while let Some(joined) = passes.join_next().await {
        results.push(joined.context("Sync task panicked")?);
    }
    results.sort_by(|a, b| a.scope.cmp(&b.scope));

    for result in &results {
        result.print_summary();
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        anyhow::bail!("Sync completed with errors ({} of {} failed)", failed, results.len());
    }

    Ok(())
}

/// Execute the status command
pub async fn status(store_path: &Path, repo: Option<&str>, verbose: bool) -> Result<()> {
    let store = YamlFileStore::open(store_path)
        .await
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;

    let scopes: Vec<Scope> = match repo {
        Some(repo) => vec![repo.parse()?],
        None => store.scopes().await.into_iter().collect(),
    };

    println!("Store: {}", store.path().display());
    if scopes.is_empty() {
        println!("\nNo repositories synced yet.");
        return Ok(());
    }

    for scope in &scopes {
        let records = store.list_records(scope).await?;
        let open = records.iter().filter(|r| r.state.is_open()).count();
        let closed_elsewhere = records.iter().filter(|r| r.closed_elsewhere).count();

        println!("\n{}", scope);
        println!("  Issues: {}", records.len());
        println!("  Open: {}", open);
        println!(
            "  Closed: {} ({} no longer reported by the remote)",
            records.len() - open,
            closed_elsewhere
        );
        match store.get_cursor(scope).await? {
            Some(cursor) => println!("  Synced through: {}", cursor.synced_through.to_rfc3339()),
            None => println!("  Synced through: never"),
        }

        if verbose {
            println!();
            for record in &records {
                let marker = match record.state {
                    IssueState::Open => "open",
                    IssueState::Closed if record.closed_elsewhere => "gone",
                    IssueState::Closed => "closed",
                };
                println!("  [#{}] [{}] {}", record.number, marker, record.title);
            }
        }
    }

    Ok(())
}

/// Execute the init command
pub fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }

    let config = SyncConfig {
        requests_per_second: Some(10),
        ..SyncConfig::default()
    };

    let template = format!(
        r#"# issuesync configuration
#
# detection: revision | field_diff
# force_full_scan: rescan every issue and close the ones that disappeared
# requests_per_second: proactive pacing of remote calls (remove to disable)
# retry: exponential backoff for network errors, 5xx and rate limiting

{}"#,
        config.to_yaml()?
    );

    fs::write(config_path, template)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Set GITHUB_TOKEN environment variable");
    println!("  2. Run: issuesync sync owner/repo");

    Ok(())
}
