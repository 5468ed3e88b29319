//! Bounded exponential-backoff retry for chain queries.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total tries, including the first one.
    pub attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Multiplier applied to the delay on each further failure.
    pub backoff: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff: 2.0,
        }
    }
}

/// Stateless retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total tries. A configured value of 0 still allows one.
    pub fn attempts(&self) -> u32 {
        self.config.attempts.max(1)
    }

    /// Delay after the `attempt`-th failure (1-based): `base * backoff^(attempt-1)`.
    ///
    /// Returns `None` once `attempt` has used up every try.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.attempts() {
            return None;
        }
        let ms = self.config.base_delay.as_millis() as f64
            * self.config.backoff.powi((attempt - 1) as i32);
        Some(Duration::from_millis(ms as u64))
    }

    /// Run `op` until it succeeds or every attempt has failed. Only
    /// [`IndexerError::is_transient`] failures are retried; any other error is
    /// returned at once.
    ///
    /// `on_retry(attempt, error, delay)` is called for each failure that is
    /// followed by another try. The last error is returned unchanged.
    pub async fn run<T, F, Fut, R>(&self, mut op: F, mut on_retry: R) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
        R: FnMut(u32, &IndexerError, Duration),
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => match self.next_delay(attempt) {
                    Some(delay) => {
                        on_retry(attempt, &e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            attempts,
            base_delay: Duration::from_millis(1),
            backoff: 2.0,
        })
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy::new(RetryConfig {
            attempts: 4,
            base_delay: Duration::from_millis(100),
            backoff: 2.0,
        });
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        // no wait after the final attempt
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn zero_attempts_means_one_try() {
        let policy = fast(0);
        assert_eq!(policy.attempts(), 1);
        assert!(policy.next_delay(1).is_none());
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retried = Vec::new();

        let result = fast(3)
            .run(
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(IndexerError::Rpc(format!("flaky {n}")))
                    } else {
                        Ok(n)
                    }
                },
                |attempt, _, _| retried.push(attempt),
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried, vec![1, 2]);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(3)
            .run(
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(IndexerError::Rpc(format!("down {n}")))
                },
                |_, _, _| {},
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().to_string(), "RPC error: down 3");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut retried = 0;
        let result: Result<(), _> = fast(5)
            .run(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(IndexerError::Decode("bad hex quantity".into()))
                },
                |_, _, _| retried += 1,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retried, 0);
        assert!(matches!(result, Err(IndexerError::Decode(_))));
    }
}
