//! In-memory local store.
//!
//! Backs tests and dry runs. Records and cursors live in hash maps behind a
//! single async mutex, so every operation is atomic with respect to the others.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

use super::{LocalStore, StoreError};
use crate::types::{IssueKey, LocalIssueRecord, Scope, SyncCursor};

#[derive(Default)]
struct Inner {
    records: HashMap<IssueKey, LocalIssueRecord>,
    cursors: HashMap<Scope, SyncCursor>,
}

/// Thread-safe, ephemeral [`LocalStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all scopes
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, key: &IssueKey) -> Result<Option<LocalIssueRecord>, StoreError> {
        Ok(self.inner.lock().await.records.get(key).cloned())
    }

    async fn upsert(&self, record: LocalIssueRecord) -> Result<(), StoreError> {
        self.inner.lock().await.records.insert(record.key(), record);
        Ok(())
    }

    async fn upsert_many(&self, records: Vec<LocalIssueRecord>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for record in records {
            inner.records.insert(record.key(), record);
        }
        Ok(())
    }

    async fn list_open_identifiers(&self, scope: &Scope) -> Result<BTreeSet<u64>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| &r.scope == scope && r.state.is_open())
            .map(|r| r.number)
            .collect())
    }

    async fn list_records(&self, scope: &Scope) -> Result<Vec<LocalIssueRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| &r.scope == scope)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.number);
        Ok(records)
    }

    async fn get_cursor(&self, scope: &Scope) -> Result<Option<SyncCursor>, StoreError> {
        Ok(self.inner.lock().await.cursors.get(scope).copied())
    }

    async fn set_cursor(&self, scope: &Scope, cursor: SyncCursor) -> Result<(), StoreError> {
        self.inner.lock().await.cursors.insert(scope.clone(), cursor);
        Ok(())
    }
}
