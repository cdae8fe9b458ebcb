use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::ProviderError;

/// Bounded exponential backoff for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the policy's
/// attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    let mut backoff = policy.initial_backoff;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed ({}), retrying in {}ms (attempt {}/{})",
                    operation_name,
                    err,
                    backoff.as_millis(),
                    attempt + 1,
                    max_attempts
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(err) => {
                if err.is_transient() {
                    error!(
                        "{} failed after {} attempts: {}",
                        operation_name, attempt, err
                    );
                }
                return Err(err);
            }
        }
    }
}
