use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

/// Fatal failure of a sync pass.
///
/// Transient remote failures never surface here directly: they are retried
/// and only escalate as [`SyncError::RetriesExhausted`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote request failed: {0}")]
    Backend(#[source] BackendError),

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync pass cancelled")]
    Cancelled,

    #[error("Write task failed: {0}")]
    Task(String),
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        SyncError::Backend(e)
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}
