//! Bounded retry with exponential backoff for platform queries

use log::debug;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::platform::PlatformError;

/// How often, and how patiently, a failed query is retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for offline platforms and tests
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay after the given failed attempt (1-based)
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Outcome of a retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub result: std::result::Result<T, PlatformError>,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently or attempts run out
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, PlatformError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_after(attempt);
                debug!("Attempt {attempt}/{max_attempts} failed ({e}), retrying in {delay:?}");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}
