use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::types::{RemoteIssue, Scope};

pub mod github;

/// Opaque continuation token for the next page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(pub String);

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for fetching one page of issues
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Only issues modified at or after this instant (incremental scans)
    pub since: Option<DateTime<Utc>>,
    /// Continuation token; `None` requests the first page
    pub page: Option<PageToken>,
    pub per_page: u8,
}

/// Rate limit information reported alongside a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Maximum requests allowed per period
    pub limit: usize,
    /// Remaining requests in the current period
    pub remaining: usize,
    /// When the period resets
    pub reset_at: DateTime<Utc>,
}

/// One page of remote issues, in the remote's stable order
#[derive(Debug, Clone)]
pub struct IssuePage {
    pub items: Vec<RemoteIssue>,
    /// Absent iff this is the last page
    pub next_page: Option<PageToken>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Failures surfaced by a [`Backend`]
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("API error: {message}")]
    Api { message: String },
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(". Resets at {}", at),
        None => String::new(),
    }
}

impl BackendError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Transient failures may succeed when retried; the rest abort the pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

/// Authenticated, read-only view of a remote issue tracker
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch a single page of issues for a scope
    async fn list_issues(
        &self,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, BackendError>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn list_issues(
        &self,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, BackendError> {
        (**self).list_issues(scope, request).await
    }
}
