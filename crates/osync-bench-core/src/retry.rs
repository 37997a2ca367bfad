//! Bounded-attempt retry with linear backoff, cooperating with [`crate::cancel::CancelToken`].
//!
//! Grounded on the `timeout(...).await??` call-and-classify shape in the teacher's
//! `engine/runner.rs::call_llm`, generalized into its own free function per spec.md §4.4.

use crate::cancel::CancelToken;
use crate::errors::Cancelled;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Invokes `op` until it returns `Ok(Some(_))`, `maxAttempts` is exhausted, or `cancel` fires.
///
/// - `Ok(None)` is treated as a retryable failure (same as `Err`), per spec.md §4.4.
/// - An error downcasting to [`Cancelled`] is rethrown immediately, never retried.
/// - Between attempts the caller-provided delay `base_delay * attempt` is awaited, itself
///   racing the cancel signal so a cancel during backoff doesn't block shutdown.
pub async fn retry<T, F, Fut>(
    mut op: F,
    name: &str,
    cancel: &CancelToken,
    max_attempts: u32,
    base_delay: Duration,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=max_attempts {
        cancel.check()?;

        match op().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::warn!(op = name, attempt, "retrying after null result");
                last_err = Some(anyhow::anyhow!("{name}: all attempts returned null"));
            }
            Err(e) => {
                if e.downcast_ref::<Cancelled>().is_some() {
                    return Err(e);
                }
                tracing::warn!(op = name, attempt, error = %e, "retrying after error");
                last_err = Some(e);
            }
        }

        if attempt < max_attempts {
            let delay = base_delay * attempt;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(Cancelled.into()),
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{name}: all {max_attempts} attempts failed")))
}

/// Convenience wrapper using the spec-mandated defaults (5 attempts, 1s base delay).
pub async fn retry_default<T, F, Fut>(op: F, name: &str, cancel: &CancelToken) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    retry(op, name, cancel, DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);
        let result = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(42))
            },
            "op",
            &cancel,
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_null_then_succeeds() {
        let cancel = CancelToken::new();
        let calls = AtomicU32::new(0);
        let result = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Ok(None)
                } else {
                    Ok(Some("ok"))
                }
            },
            "op",
            &cancel,
            5,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_surfaces_last_error() {
        let cancel = CancelToken::new();
        let result: anyhow::Result<()> = retry(
            || async { Err(anyhow::anyhow!("boom")) },
            "op",
            &cancel,
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let cancel = CancelToken::new();
        cancel.signal();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            },
            "op",
            &cancel,
            5,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
