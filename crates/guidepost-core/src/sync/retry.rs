//! Exponential backoff for durable writes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::StoreError;

/// Retry policy for one write strategy.
///
/// Delays double from `initial_delay_ms` and are capped at `max_delay_ms`.
/// `jitter` adds up to a tenth of the delay at random.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Delay after the given failed attempt (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let jitter = if self.jitter && base > 0 {
            rand::thread_rng().gen_range(0..=base / 10)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy's attempts are used up. Returns the last error on failure.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(label, attempt = attempt + 1, "Write succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(label, attempts = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Write failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(80), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy { jitter: true, ..RetryPolicy::default() };
        for _ in 0..50 {
            let d = policy.delay_for_attempt(1).as_millis();
            assert!((500..=550).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::immediate(5), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Unavailable("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::RateLimited)
        })
        .await;
        assert!(matches!(result, Err(StoreError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::VersionConflict { table: "ticket_buckets".into(), id: "b1".into() })
        })
        .await;
        assert!(result.unwrap_err().is_version_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
