//! Retry policy: exponential backoff with deterministic jitter.
//!
//! Only transient errors (network, 5xx, 429) are retried; rejections and
//! everything else propagate immediately. Jitter derives from a hash of
//! (operation, attempt) so test runs are reproducible and no RNG
//! dependency is needed.

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::warn;

use nexsus_core::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based) of `operation`.
    pub fn delay(&self, operation: &str, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        // Up to +25% jitter, keyed so two services never sync their waves.
        let mut hasher = ahash::AHasher::default();
        (operation, attempt).hash(&mut hasher);
        let jitter_frac = (hasher.finish() % 1000) as f64 / 4000.0;
        capped.mul_f64(1.0 + jitter_frac)
    }
}

/// Run `f` under `policy`, retrying transient failures.
pub async fn retry_with<F, Fut, T>(policy: RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay(operation, attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexsus_core::error::NexsusError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with(fast_policy(), "embed", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NexsusError::transient("embedding", "503"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry_with(fast_policy(), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(NexsusError::rejected("embedding", "400"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, NexsusError::Rejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let err = retry_with(fast_policy(), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(NexsusError::transient("embedding", "timeout"))
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_grow_and_stay_bounded() {
        let policy = RetryPolicy::default();
        let d1 = policy.delay("op", 1);
        let d2 = policy.delay("op", 2);
        let d3 = policy.delay("op", 3);
        assert!(d1 < d2 && d2 < d3);
        assert!(policy.delay("op", 30) <= policy.max_delay.mul_f64(1.25));
        // Deterministic for a given key.
        assert_eq!(policy.delay("op", 2), policy.delay("op", 2));
    }
}
