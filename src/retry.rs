//! Rate/retry governor wrapping every page fetch.
//!
//! Transient failures (network, 5xx, rate limiting, an exhausted local
//! budget) are retried with capped exponential backoff. Once the retry bound
//! is reached the failure escalates to [`SyncError::RetriesExhausted`].
//! Fatal failures propagate on the first attempt.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, BackendError, IssuePage, PageRequest};
use crate::error::SyncError;
use crate::rate_limit::{RequestBudget, RequestPacer};
use crate::types::Scope;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Maximum retries for a single page fetch.
pub const MAX_RETRIES: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    #[serde(rename = "min_delay_ms", with = "millis")]
    pub min_delay: Duration,
    /// Maximum delay between retries.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_RETRIES,
            jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            jitter: true,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Gatekeeper for remote calls: budget, pacing and retry policy.
///
/// One governor is shared by every scope of a session, since the remote
/// budget belongs to the credential rather than to a repository. Backoff
/// sleeps are async and never hold a lock, so a scope that is backing off
/// does not stall the others.
pub struct Governor {
    retry: RetryConfig,
    budget: RequestBudget,
    pacer: Option<RequestPacer>,
}

impl Governor {
    pub fn new(retry: RetryConfig, requests_per_second: Option<u32>) -> Self {
        Self {
            retry,
            budget: RequestBudget::new(),
            pacer: requests_per_second.map(RequestPacer::new),
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetch one page through the retry policy.
    pub async fn fetch_page<B: Backend + ?Sized>(
        &self,
        backend: &B,
        scope: &Scope,
        request: &PageRequest,
    ) -> Result<IssuePage, SyncError> {
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let budget = &self.budget;
        let pacer = self.pacer.as_ref();

        let operation = || async move {
            attempts_ref.fetch_add(1, Ordering::SeqCst);

            if let Some(pacer) = pacer {
                pacer.wait().await;
            }
            budget.try_acquire(Utc::now())?;

            let page = backend.list_issues(scope, request).await?;
            if let Some(info) = page.rate_limit {
                budget.observe(info);
            }
            Ok::<_, BackendError>(page)
        };

        let result = operation
            .retry(self.retry.backoff())
            .when(BackendError::is_transient)
            .notify(|err: &BackendError, dur: Duration| {
                tracing::warn!(
                    scope = %scope,
                    attempt = attempts_ref.load(Ordering::SeqCst),
                    retry_in = ?dur,
                    error = %err,
                    "Transient failure, backing off"
                );
            })
            .await;

        result.map_err(|e| {
            let attempts = attempts.load(Ordering::SeqCst);
            if e.is_transient() {
                tracing::error!(scope = %scope, attempts, error = %e, "Retry bound exceeded");
                SyncError::RetriesExhausted {
                    attempts,
                    source: e,
                }
            } else {
                SyncError::Backend(e)
            }
        })
    }
}
