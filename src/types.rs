use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A repository on the remote tracker, in `owner/repo` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope {
    pub owner: String,
    pub repo: String,
}

impl Scope {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Error returned when a scope string is not `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid scope '{0}'. Expected: owner/repo")]
pub struct InvalidScope(pub String);

impl FromStr for Scope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(InvalidScope(s.to_string()));
        }

        Ok(Self::new(parts[0].trim(), parts[1].trim()))
    }
}

impl TryFrom<String> for Scope {
    type Error = InvalidScope;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

/// Open/closed state of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn is_open(&self) -> bool {
        matches!(self, IssueState::Open)
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueState::Open => write!(f, "open"),
            IssueState::Closed => write!(f, "closed"),
        }
    }
}

/// Monotonically increasing per-issue update indicator.
///
/// Backed by the remote last-modified timestamp, so ordering is the
/// timestamp ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub DateTime<Utc>);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Identifies one issue across every scope held by a local store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueKey {
    pub scope: Scope,
    pub number: u64,
}

impl IssueKey {
    pub fn new(scope: Scope, number: u64) -> Self {
        Self { scope, number }
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.number)
    }
}

/// Snapshot of an issue as reported by the remote tracker
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteIssue {
    /// Issue number, unique within its scope
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub labels: BTreeSet<String>,
    pub assignees: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    pub revision: Revision,
}

/// Locally persisted counterpart of a [`RemoteIssue`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalIssueRecord {
    pub scope: Scope,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: IssueState,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub assignees: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
    /// Revision marker of the remote snapshot last written here
    pub revision: Revision,
    pub synced_at: DateTime<Utc>,
    /// Set when a full scan no longer reported the issue as open
    #[serde(default)]
    pub closed_elsewhere: bool,
}

impl LocalIssueRecord {
    pub fn from_remote(scope: &Scope, issue: &RemoteIssue, synced_at: DateTime<Utc>) -> Self {
        Self {
            scope: scope.clone(),
            number: issue.number,
            title: issue.title.clone(),
            body: issue.body.clone(),
            state: issue.state,
            labels: issue.labels.clone(),
            assignees: issue.assignees.clone(),
            updated_at: issue.updated_at,
            revision: issue.revision,
            synced_at,
            closed_elsewhere: false,
        }
    }

    pub fn key(&self) -> IssueKey {
        IssueKey::new(self.scope.clone(), self.number)
    }

    /// Whether any synced field differs from the remote snapshot
    pub fn differs_from(&self, issue: &RemoteIssue) -> bool {
        self.title != issue.title
            || self.body != issue.body
            || self.state != issue.state
            || self.labels != issue.labels
            || self.assignees != issue.assignees
    }

    /// Close the record without touching its revision marker
    pub fn mark_closed_elsewhere(&mut self, now: DateTime<Utc>) {
        self.state = IssueState::Closed;
        self.closed_elsewhere = true;
        self.synced_at = now;
    }
}

/// Resume point of the last fully successful pass for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncCursor {
    pub synced_through: DateTime<Utc>,
}

impl SyncCursor {
    pub fn new(synced_through: DateTime<Utc>) -> Self {
        Self { synced_through }
    }
}
