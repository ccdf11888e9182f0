//! Bounded retry with a fixed delay
//!
//! Retries are only applied at call sites that ask for them (container deploy,
//! `execute_with_retry`). Nothing is retried implicitly.

use deckhand_core::{DeployError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Retry only errors flagged as timeouts
    pub only_timeouts: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            only_timeouts: false,
        }
    }

    pub fn only_timeouts(mut self) -> Self {
        self.only_timeouts = true;
        self
    }

    fn should_retry(&self, err: &DeployError) -> bool {
        !self.only_timeouts || err.is_timeout()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10))
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub max_retries_reached: bool,
}

/// Runs `op` until it succeeds or the policy is exhausted
///
/// # Arguments
/// * `policy` - Attempt budget and delay
/// * `label` - Operation name for logs
/// * `op` - Produces one attempt
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", label, attempt);
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                    max_retries_reached: false,
                };
            }
            Err(e) => {
                if !policy.should_retry(&e) {
                    error!("{} failed with a non-retryable error: {}", label, e);
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                        max_retries_reached: false,
                    };
                }

                if attempt >= policy.max_attempts {
                    error!("{} failed after {} attempts", label, policy.max_attempts);
                    return Retried {
                        result: Err(e),
                        attempts: attempt,
                        max_retries_reached: true,
                    };
                }

                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    label, attempt, policy.max_attempts, e, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timeout_err() -> DeployError {
        DeployError::Timeout {
            command: "docker compose up".to_string(),
            seconds: 300,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let retried = retry(RetryPolicy::new(3, Duration::ZERO), "deploy", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(timeout_err())
                } else {
                    Ok("up")
                }
            }
        })
        .await;

        assert_eq!(retried.result.unwrap(), "up");
        assert_eq!(retried.attempts, 3);
        assert!(!retried.max_retries_reached);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let retried: Retried<()> = retry(RetryPolicy::new(2, Duration::ZERO), "deploy", |_| async {
            Err(DeployError::NotFound("compose file".to_string()))
        })
        .await;

        assert!(retried.result.is_err());
        assert_eq!(retried.attempts, 2);
        assert!(retried.max_retries_reached);
    }

    #[tokio::test]
    async fn test_only_timeouts_stops_on_other_errors() {
        let policy = RetryPolicy::new(5, Duration::ZERO).only_timeouts();
        let retried: Retried<()> = retry(policy, "pull", |_| async {
            Err(DeployError::NotFound("image".to_string()))
        })
        .await;

        assert_eq!(retried.attempts, 1);
        assert!(!retried.max_retries_reached);
    }
}
