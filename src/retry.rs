//! Bounded exponential backoff for network calls.
//!
//! An operation is retried only when it fails with
//! [`IndexError::Transient`]; any other error is returned immediately.
//! Delays double from `base_delay_ms` and are capped at `max_delay_ms`.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use index_harness_core::IndexError;

use crate::config::RetryConfig;

/// Whether `err` (or anything it wraps) is a transient [`IndexError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<IndexError>()
            .is_some_and(IndexError::is_transient)
    })
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    Duration::from_millis(
        policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(policy.max_delay_ms),
    )
}

/// Run `op` up to `policy.max_attempts` times.
pub async fn with_backoff<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 500,
            max_delay_ms: 3_000,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(3_000));
        assert_eq!(backoff_delay(&policy, 40), Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(&fast(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IndexError::Transient("429".into()).into())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Transient("503".into()).into())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("400 bad request"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
