//! Bounded retry with exponential backoff for transient collaborator failures.

use std::future::Future;
use std::time::Duration;

use crate::error::ScraperError;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy. Computes the next delay given the attempt number.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that retries `max_retries` times without sleeping. Handy in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        })
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }

    /// Total number of tries, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy
/// runs out of retries. The last error is returned on exhaustion.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, ScraperError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScraperError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                attempt += 1;
                match policy.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(op = label, attempt, error = %e, "transient failure, retrying");
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_stop() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
        });
        assert!(policy.next_delay(5).unwrap() <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_until_exhausted() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(2);
        let result: Result<(), _> = retry_async(&policy, "find_one", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScraperError::Storage("connection reset".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);
        let result: Result<(), _> = retry_async(&policy, "insert_one", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ScraperError::DuplicateKey { collection: "Operations".into() })
        })
        .await;
        assert!(result.unwrap_err().is_duplicate_key());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);
        let value = retry_async(&policy, "get_content", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ScraperError::Ledger("timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }
}
