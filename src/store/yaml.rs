use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{LocalStore, StoreError};
use crate::types::{IssueKey, LocalIssueRecord, Scope, SyncCursor};

/// On-disk layout of the store document
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    cursors: BTreeMap<Scope, SyncCursor>,
    #[serde(default)]
    issues: Vec<LocalIssueRecord>,
}

#[derive(Default)]
struct State {
    cursors: BTreeMap<Scope, SyncCursor>,
    records: BTreeMap<IssueKey, LocalIssueRecord>,
}

impl State {
    fn from_file(file: StoreFile) -> Result<Self, StoreError> {
        let mut records = BTreeMap::new();
        for record in file.issues {
            if let Some(dup) = records.insert(record.key(), record) {
                return Err(StoreError::Corrupt {
                    message: format!("duplicate record for {}", dup.key()),
                });
            }
        }

        Ok(Self {
            cursors: file.cursors,
            records,
        })
    }

    fn to_file(&self) -> StoreFile {
        StoreFile {
            cursors: self.cursors.clone(),
            issues: self.records.values().cloned().collect(),
        }
    }
}

/// [`LocalStore`] persisted as a single YAML document.
///
/// The whole document is rewritten on every mutation, via a temporary file
/// renamed over the original, so a crash never leaves a half-written store.
/// Sync passes write each page through [`LocalStore::upsert_many`], so a
/// page costs one rewrite rather than one per issue.
pub struct YamlFileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl YamlFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => State::default(),
            Ok(content) => State::from_file(serde_yaml::from_str(&content)?)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), records = state.records.len(), "Opened store");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every scope with a record or a cursor in the store
    pub async fn scopes(&self) -> BTreeSet<Scope> {
        let state = self.state.lock().await;
        state
            .cursors
            .keys()
            .cloned()
            .chain(state.records.keys().map(|k| k.scope.clone()))
            .collect()
    }

    async fn persist(&self, state: &State) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(&state.to_file())?;
        let tmp = self.path.with_extension("yaml.tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&tmp, yaml)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl LocalStore for YamlFileStore {
    async fn get(&self, key: &IssueKey) -> Result<Option<LocalIssueRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(key).cloned())
    }

    async fn upsert(&self, record: LocalIssueRecord) -> Result<(), StoreError> {
        self.upsert_many(vec![record]).await
    }

    async fn upsert_many(&self, records: Vec<LocalIssueRecord>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let mut replaced = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key();
            let previous = state.records.insert(key.clone(), record);
            replaced.push((key, previous));
        }

        if let Err(e) = self.persist(&state).await {
            // Keep memory consistent with what is on disk
            for (key, previous) in replaced.into_iter().rev() {
                match previous {
                    Some(previous) => state.records.insert(key, previous),
                    None => state.records.remove(&key),
                };
            }
            return Err(e);
        }
        Ok(())
    }

    async fn list_open_identifiers(&self, scope: &Scope) -> Result<BTreeSet<u64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| &r.scope == scope && r.state.is_open())
            .map(|r| r.number)
            .collect())
    }

    async fn list_records(&self, scope: &Scope) -> Result<Vec<LocalIssueRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| &r.scope == scope)
            .cloned()
            .collect())
    }

    async fn get_cursor(&self, scope: &Scope) -> Result<Option<SyncCursor>, StoreError> {
        Ok(self.state.lock().await.cursors.get(scope).copied())
    }

    async fn set_cursor(&self, scope: &Scope, cursor: SyncCursor) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let previous = state.cursors.insert(scope.clone(), cursor);

        if let Err(e) = self.persist(&state).await {
            match previous {
                Some(previous) => state.cursors.insert(scope.clone(), previous),
                None => state.cursors.remove(scope),
            };
            return Err(e);
        }
        Ok(())
    }
}
