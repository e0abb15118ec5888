//! Change detection between a remote snapshot and its local record.

use serde::{Deserialize, Serialize};

use crate::types::{LocalIssueRecord, RemoteIssue};

/// Outcome of comparing one remote issue with its local record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No local record exists yet
    Created,
    /// Remote carries newer state than the local record
    Updated,
    Unchanged,
}

/// Rule used to decide whether a remote snapshot is newer than local state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Updated iff the remote revision marker is strictly newer
    #[default]
    Revision,
    /// Like `Revision`, but equal markers with differing fields also count as
    /// updated. For remotes whose markers have coarse resolution.
    FieldDiff,
}

/// Classify a remote issue against its local record, if any.
///
/// A remote marker older than the local one is always `Unchanged`, whatever
/// the strategy: local state never regresses.
pub fn classify(
    remote: &RemoteIssue,
    local: Option<&LocalIssueRecord>,
    strategy: DetectionStrategy,
) -> Change {
    let Some(local) = local else {
        return Change::Created;
    };

    if remote.revision > local.revision {
        return Change::Updated;
    }

    // A closure inferred from absence yields to the remote reporting it open
    if local.closed_elsewhere && remote.state.is_open() && remote.revision == local.revision {
        return Change::Updated;
    }

    match strategy {
        DetectionStrategy::FieldDiff
            if remote.revision == local.revision && local.differs_from(remote) =>
        {
            Change::Updated
        }
        _ => Change::Unchanged,
    }
}
