use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::retry::Governor;
use crate::store::LocalStore;
use crate::sync::{Reconciler, SyncResult};
use crate::types::Scope;

/// Entry point of the engine: runs sync passes against one authenticated client.
///
/// Passes for different scopes may run concurrently on the same session and
/// never wait on each other. Passes for the same scope are serialized. That
/// serialization is local to the session: a store must be driven by a single
/// session, or same-scope passes from different sessions may interleave.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use issuesync::backend::github::GitHubBackend;
/// use issuesync::store::MemoryStore;
/// use issuesync::SyncSession;
///
/// let session = SyncSession::new(GitHubBackend::new(&token)?, Arc::new(MemoryStore::new()));
/// let result = session.run_sync_pass(&"rust-lang/rust".parse()?).await;
/// result.print_summary();
/// ```
pub struct SyncSession<B, S: ?Sized> {
    backend: B,
    store: Arc<S>,
    config: SyncConfig,
    governor: Governor,
    scope_locks: Mutex<HashMap<Scope, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B, S> SyncSession<B, S>
where
    B: Backend,
    S: LocalStore + ?Sized + 'static,
{
    pub fn new(backend: B, store: Arc<S>) -> Self {
        Self::with_config(backend, store, SyncConfig::default())
    }

    pub fn with_config(backend: B, store: Arc<S>, config: SyncConfig) -> Self {
        let governor = Governor::new(config.retry.clone(), config.requests_per_second);
        Self {
            backend,
            store,
            config,
            governor,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Run one complete sync pass for `scope`.
    pub async fn run_sync_pass(&self, scope: &Scope) -> SyncResult {
        self.run_sync_pass_with_cancel(scope, CancellationToken::new())
            .await
    }

    /// Run one sync pass that stops between pages once `cancel` fires.
    ///
    /// A cancelled pass reports [`SyncError::Cancelled`](crate::SyncError::Cancelled)
    /// and leaves the scope's cursor untouched.
    pub async fn run_sync_pass_with_cancel(
        &self,
        scope: &Scope,
        cancel: CancellationToken,
    ) -> SyncResult {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        Reconciler::new(&self.backend, &self.store, &self.governor, &self.config)
            .run(scope, &cancel)
            .await
    }

    fn scope_lock(&self, scope: &Scope) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.scope_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Entries only the map references belong to no running or waiting pass
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(scope.clone()).or_default())
    }
}
