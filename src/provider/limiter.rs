//! Bounded concurrency and retry for provider calls.
//!
//! The rate limiter is a fixed-size slot pool; every provider request runs
//! inside a slot. Transient failures retry with exponential backoff and
//! jitter, and exhausted retries surface as a rate-limit error regardless
//! of the final underlying failure.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::core::errors::{HandoverError, Result};

/// Retry behavior for transient provider failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub max_retries: u32,
    /// Base delay for the backoff curve
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 30_000,
        }
    }
}

/// Backoff delay for a retry attempt.
///
/// `unit` is a random sample in `[0, 1)`; the delay is
/// `base * 2^attempt * (0.5 + unit)`, so attempt 0 with a 30s base sleeps
/// between 15s and 45s. Isolating the sample makes the curve testable.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, unit: f64) -> Duration {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    let jittered = exponential as f64 * (0.5 + unit);
    Duration::from_millis(jittered as u64)
}

/// Run an operation with retry on transient errors.
///
/// Retryable classification comes from [`HandoverError::is_retryable`].
/// When every attempt fails, the final error is wrapped as `RateLimited`
/// whatever its original kind.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = backoff_delay(attempt, policy.base_delay_ms, rand::random::<f64>());
                warn!(
                    "provider attempt {} failed ({}), retrying in {:.1}s",
                    attempt + 1,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            }
            Err(err) => {
                let attempts = attempt + 1;
                return Err(HandoverError::RateLimited {
                    message: err.to_string(),
                    attempts,
                    source: Some(Box::new(err)),
                });
            }
        }
    }

    // Unreachable in practice: the loop always returns. Kept for totality.
    Err(HandoverError::RateLimited {
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "retries exhausted".to_string()),
        attempts: policy.max_retries + 1,
        source: None,
    })
}

/// Fixed-size slot pool bounding concurrent provider requests.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Semaphore,
    width: usize,
}

impl RateLimiter {
    /// Create a limiter with the given number of slots.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            semaphore: Semaphore::new(width),
            width,
        }
    }

    /// Number of slots in the pool.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Acquire a slot, run the operation, release the slot.
    pub async fn with_limit<T, Fut>(&self, operation: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("rate limiter semaphore closed");
        operation.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_delay_range() {
        // Attempt 0 with a 30s base: [15s, 45s).
        assert_eq!(backoff_delay(0, 30_000, 0.0), Duration::from_millis(15_000));
        assert!(backoff_delay(0, 30_000, 0.999) < Duration::from_millis(45_000));
        // Attempt 1 doubles the base.
        assert_eq!(backoff_delay(1, 30_000, 0.5), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let result: Result<&str> = retry_with_backoff(policy, move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(HandoverError::provider_transient("slow down", Some(429)))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately_as_rate_limited() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let result: Result<()> = retry_with_backoff(policy, move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HandoverError::provider_schema("bad json"))
            }
        })
        .await;

        assert!(matches!(result, Err(HandoverError::RateLimited { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_wrap_as_rate_limited() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
        };
        let result: Result<()> = retry_with_backoff(policy, || async {
            Err(HandoverError::provider_transient("overloaded", Some(529)))
        })
        .await;

        assert!(matches!(result, Err(HandoverError::RateLimited { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_limiter_bounds_concurrency() {
        let limiter = Arc::new(RateLimiter::new(2));
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .with_limit(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
