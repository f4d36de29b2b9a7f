//! Keyed sliding-window rate limiting
//!
//! Each key gets an independent window of recent request instants. A request
//! is admitted when fewer than `max_requests` requests landed within the
//! trailing window; otherwise the caller learns how long until the oldest
//! request ages out. Instants are monotonic (and pausable under tokio's test
//! clock), so wall-clock adjustments cannot skew the window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Rate limiting error
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },
}

impl From<RateLimitError> for crate::Error {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::RateLimitExceeded {
                retry_after_seconds,
            } => Self::RateLimited {
                retry_after_seconds,
            },
        }
    }
}

/// In-memory sliding-window rate limiter keyed by caller-chosen strings.
#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a request is allowed under the rate limit.
    ///
    /// # Arguments
    /// * `key` - Unique identifier for the rate limit (e.g., "`chat:{session_id}:{author_id}`")
    /// * `max_requests` - Maximum number of requests allowed in the window
    /// * `window` - Size of the sliding window
    pub fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_default();

        // Evict requests that have aged out of the window
        while entry
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= window)
        {
            entry.pop_front();
        }

        if entry.len() >= max_requests as usize {
            // Oldest in-window request decides when capacity frees up
            let oldest = *entry.front().ok_or(RateLimitError::RateLimitExceeded {
                retry_after_seconds: 1,
            })?;
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError::RateLimitExceeded {
                retry_after_seconds: retry_after.as_secs().max(1),
            });
        }

        entry.push_back(now);
        Ok(())
    }

    /// Drop windows that have gone fully idle, bounding memory under key churn
    pub fn purge_idle(&self, window: Duration) {
        let now = Instant::now();
        self.windows.retain(|_, requests| {
            requests
                .back()
                .is_some_and(|latest| now.duration_since(*latest) < window)
        });
    }

    /// Number of tracked keys (for introspection and tests)
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
