use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::params;
use octocrab::Octocrab;
use std::sync::Mutex;

use super::{Backend, BackendError, IssuePage, PageRequest, PageToken, RateLimitInfo};
use crate::types::{IssueState, RemoteIssue, Revision, Scope};

/// Estimated remaining requests at or below which the rate-limit resource is re-read
const REFRESH_BELOW_REMAINING: usize = 100;

/// GitHub backend using octocrab
pub struct GitHubBackend {
    client: Octocrab,
    /// Last fetched rate limit, decremented locally per listing request
    known_rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl GitHubBackend {
    /// Create a new GitHub backend with a personal access token
    pub fn new(token: &str) -> Result<Self, BackendError> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| BackendError::Auth {
                message: format!("Failed to create GitHub client: {}", e),
            })?;

        Ok(Self::from_octocrab(client))
    }

    /// Wrap an already-authenticated octocrab instance
    pub fn from_octocrab(client: Octocrab) -> Self {
        Self {
            client,
            known_rate_limit: Mutex::new(None),
        }
    }

    async fn rate_limit(&self) -> Result<RateLimitInfo, BackendError> {
        let rate_limit = self
            .client
            .ratelimit()
            .get()
            .await
            .map_err(|e| map_octocrab_error(e, None))?;
        let core = &rate_limit.resources.core;

        Ok(RateLimitInfo {
            limit: core.limit,
            remaining: core.remaining,
            reset_at: DateTime::from_timestamp(core.reset as i64, 0).unwrap_or_else(Utc::now),
        })
    }

    /// Account for one listing request and report the current budget.
    ///
    /// `/rate_limit` does not count against the limit, but it is a round trip,
    /// so it is only read when the local estimate is missing, stale or low.
    async fn track_rate_limit(&self, scope: &Scope) -> Option<RateLimitInfo> {
        let estimate = {
            let mut known = self
                .known_rate_limit
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(info) = known.as_mut() {
                info.remaining = info.remaining.saturating_sub(1);
            }
            *known
        };

        if !needs_refresh(estimate.as_ref(), Utc::now()) {
            return estimate;
        }

        match self.rate_limit().await {
            Ok(info) => {
                *self
                    .known_rate_limit
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(info);
                Some(info)
            }
            Err(e) => {
                // A failed refresh should not discard a fetched page
                tracing::debug!(scope = %scope, error = %e, "Rate limit refresh failed");
                estimate
            }
        }
    }
}

fn needs_refresh(known: Option<&RateLimitInfo>, now: DateTime<Utc>) -> bool {
    match known {
        None => true,
        Some(info) => info.reset_at <= now || info.remaining <= REFRESH_BELOW_REMAINING,
    }
}

/// GitHub reports primary and secondary rate limiting as 403 with a message
fn mentions_rate_limit(message: &str) -> bool {
    message.to_ascii_lowercase().contains("rate limit")
}

/// Convert octocrab issue to our RemoteIssue type
fn convert_issue(issue: octocrab::models::issues::Issue) -> RemoteIssue {
    let state = match issue.state {
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    };

    RemoteIssue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        state,
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        assignees: issue.assignees.into_iter().map(|a| a.login).collect(),
        updated_at: issue.updated_at,
        revision: Revision(issue.updated_at),
    }
}

/// Map an HTTP status returned by GitHub onto the transient/fatal taxonomy
fn classify_status(status: u16, message: String, scope: Option<&Scope>) -> BackendError {
    match status {
        401 => BackendError::Auth { message },
        429 => BackendError::RateLimited { reset_at: None },
        403 if mentions_rate_limit(&message) => BackendError::RateLimited { reset_at: None },
        // Missing permission, SSO enforcement, blocked resources
        403 => BackendError::Auth { message },
        404 | 410 => BackendError::InvalidScope {
            scope: scope.map(|s| s.to_string()).unwrap_or(message),
        },
        500..=599 => BackendError::Server { status, message },
        _ => BackendError::Api { message },
    }
}

fn map_octocrab_error(e: octocrab::Error, scope: Option<&Scope>) -> BackendError {
    match e {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(source.status_code.as_u16(), source.message.clone(), scope)
        }
        // Empty or truncated bodies show up under load; treat as transport failures
        octocrab::Error::Json { .. } | octocrab::Error::Serde { .. } => {
            BackendError::network(e.to_string())
        }
        octocrab::Error::Hyper { .. }
        | octocrab::Error::Http { .. }
        | octocrab::Error::Service { .. } => BackendError::network(e.to_string()),
        other => BackendError::api(other.to_string()),
    }
}

/// Extract the page parameter from a URL.
fn extract_page_from_url(url: &str) -> Option<u32> {
    let query_start = url.find('?')?;
    let query = &url[query_start + 1..];

    for param in query.split('&') {
        if let Some(value) = param.strip_prefix("page=") {
            return value.parse().ok();
        }
    }

    None
}

#[async_trait]
impl Backend for GitHubBackend {
    async fn list_issues(
        &self,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, BackendError> {
        let page_number = match &request.page {
            Some(token) => token.0.parse::<u32>().map_err(|_| {
                BackendError::api(format!("Malformed page token '{}'", token))
            })?,
            None => 1,
        };

        let handler = self.client.issues(&scope.owner, &scope.repo);
        let mut builder = handler
            .list()
            .state(params::State::All)
            .sort(params::issues::Sort::Updated)
            .direction(params::Direction::Ascending)
            .per_page(request.per_page)
            .page(page_number);
        if let Some(since) = request.since {
            builder = builder.since(since);
        }

        let page = builder
            .send()
            .await
            .map_err(|e| map_octocrab_error(e, Some(scope)))?;

        let next_page = page
            .next
            .as_ref()
            .and_then(|url| extract_page_from_url(&url.to_string()))
            .map(|n| PageToken(n.to_string()));

        // The issues listing also returns pull requests
        let items = page
            .items
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(convert_issue)
            .collect();

        let rate_limit = self.track_rate_limit(scope).await;

        Ok(IssuePage {
            items,
            next_page,
            rate_limit,
        })
    }
}
