use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{IssueKey, LocalIssueRecord, Scope, SyncCursor};

pub mod memory;
pub mod yaml;

pub use memory::MemoryStore;
pub use yaml::YamlFileStore;

/// Failures raised by a [`LocalStore`]. All of them abort a sync pass.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize store: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("Store is corrupt: {message}")]
    Corrupt { message: String },
}

/// Local persisted issue set, shared by every scope
///
/// Implementations must tolerate concurrent calls for distinct issue keys.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Look up the record for one issue
    async fn get(&self, key: &IssueKey) -> Result<Option<LocalIssueRecord>, StoreError>;

    /// Insert or replace the record keyed by `record.key()`
    async fn upsert(&self, record: LocalIssueRecord) -> Result<(), StoreError>;

    /// Insert or replace a batch of records. Every record is durable once this returns.
    ///
    /// The default writes one record at a time; stores with a per-write cost
    /// should apply the batch at once.
    async fn upsert_many(&self, records: Vec<LocalIssueRecord>) -> Result<(), StoreError> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    /// Numbers of all records in `scope` whose state is open
    async fn list_open_identifiers(&self, scope: &Scope) -> Result<BTreeSet<u64>, StoreError>;

    /// All records in `scope`, ordered by issue number
    async fn list_records(&self, scope: &Scope) -> Result<Vec<LocalIssueRecord>, StoreError>;

    async fn get_cursor(&self, scope: &Scope) -> Result<Option<SyncCursor>, StoreError>;

    /// Persist the cursor. Every upsert issued before this call must already be durable.
    async fn set_cursor(&self, scope: &Scope, cursor: SyncCursor) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: LocalStore + ?Sized> LocalStore for Arc<S> {
    async fn get(&self, key: &IssueKey) -> Result<Option<LocalIssueRecord>, StoreError> {
        (**self).get(key).await
    }

    async fn upsert(&self, record: LocalIssueRecord) -> Result<(), StoreError> {
        (**self).upsert(record).await
    }

    async fn upsert_many(&self, records: Vec<LocalIssueRecord>) -> Result<(), StoreError> {
        (**self).upsert_many(records).await
    }

    async fn list_open_identifiers(&self, scope: &Scope) -> Result<BTreeSet<u64>, StoreError> {
        (**self).list_open_identifiers(scope).await
    }

    async fn list_records(&self, scope: &Scope) -> Result<Vec<LocalIssueRecord>, StoreError> {
        (**self).list_records(scope).await
    }

    async fn get_cursor(&self, scope: &Scope) -> Result<Option<SyncCursor>, StoreError> {
        (**self).get_cursor(scope).await
    }

    async fn set_cursor(&self, scope: &Scope, cursor: SyncCursor) -> Result<(), StoreError> {
        (**self).set_cursor(scope, cursor).await
    }
}
