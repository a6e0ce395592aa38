//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

/// Retry policy applied to whole operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Relative jitter applied in both directions, `0.25` is ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), jitter included.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        let spread = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 + spread * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error,
    /// the attempts are used up, or the next backoff would pass `deadline`.
    pub async fn run<T, F, Fut>(&self, op: &'static str, deadline: Instant, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && tries < self.max_attempts => {
                    let delay = self.delay_for_retry(tries);
                    if Instant::now() + delay >= deadline {
                        return Err(err);
                    }
                    tracing::warn!(
                        op,
                        attempt = tries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying operation"
                    );
                    metrics::counter!("order_retries_total", "op" => op).increment(1);
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_within_jitter() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let first = policy.delay_for_retry(1).as_secs_f64();
            assert!((0.0375..=0.0625).contains(&first), "{first}");
            let second = policy.delay_for_retry(2).as_secs_f64();
            assert!((0.075..=0.125).contains(&second), "{second}");
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_retry(30), policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_conflicts_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let deadline = Instant::now() + Duration::from_secs(10);

        let result = policy
            .run("test", deadline, || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ServiceError::Conflict("busy".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let deadline = Instant::now() + Duration::from_secs(10);

        let result: Result<()> = RetryPolicy::default()
            .run("test", deadline, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::InventoryConflict("row".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(ServiceError::InventoryConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let deadline = Instant::now() + Duration::from_secs(10);

        let result: Result<()> = RetryPolicy::default()
            .run("test", deadline, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Validation("bad".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_before_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let deadline = Instant::now() + Duration::from_millis(1);

        let result: Result<()> = RetryPolicy::default()
            .run("test", deadline, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::Conflict("busy".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
