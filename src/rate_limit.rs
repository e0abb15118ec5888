//! Request budget and pacing for remote calls.
//!
//! [`RequestBudget`] mirrors the remote service's own accounting: every call
//! spends one token locally, and the rate-limit metadata returned with each
//! page replaces the local estimate. [`RequestPacer`] adds optional proactive
//! pacing on top, so bursts stay under secondary limits.

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Mutex;

use crate::backend::{BackendError, RateLimitInfo};

#[derive(Debug, Default)]
struct BudgetState {
    info: Option<RateLimitInfo>,
}

/// Token budget replenished from remote rate-limit metadata.
///
/// Until the first response reports a budget, requests are unrestricted.
#[derive(Debug, Default)]
pub struct RequestBudget {
    state: Mutex<BudgetState>,
}

impl RequestBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend one token, or fail with a transient error while exhausted.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(info) = state.info.as_mut() else {
            return Ok(());
        };

        if info.remaining == 0 {
            if info.reset_at > now {
                return Err(BackendError::RateLimited {
                    reset_at: Some(info.reset_at),
                });
            }
            // Window has rolled over
            info.remaining = info.limit;
        }

        info.remaining = info.remaining.saturating_sub(1);
        Ok(())
    }

    /// Replace the local estimate with what the remote reported
    pub fn observe(&self, info: RateLimitInfo) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.info = Some(info);
    }

    pub fn snapshot(&self) -> Option<RateLimitInfo> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).info
    }
}

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Proactive requests-per-second limiter
pub struct RequestPacer {
    inner: GovernorRateLimiter,
}

impl RequestPacer {
    /// Create a pacer allowing `requests_per_second` (0 is treated as 1)
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: RateLimiter::direct(Quota::per_second(rps)),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}
