//! # Commit Retry
//!
//! Re-runs a commit unit that failed transiently: SQLite stayed busy past
//! its timeout, or an optimistic compare-and-set lost to another writer.
//!
//! ```text
//!   attempt ──► Ok ─────────────────────────────► done
//!      │
//!      ├─► Err(retryable) ─► backoff.next_backoff() ─► sleep ─► attempt
//!      │                      (None / retries spent) ──► Err
//!      │
//!      └─► Err(business rejection) ────────────────► Err, never retried
//! ```

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use tally_core::{CoreError, CoreResult};

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        RetryPolicy {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        self.run_when(operation, CoreError::is_retryable, op).await
    }

    /// Like [`run`](Self::run), retrying only errors accepted by `retry_if`.
    pub async fn run_when<T, F, Fut>(
        &self,
        operation: &str,
        retry_if: impl Fn(&CoreError) -> bool,
        mut op: F,
    ) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry_if(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(e);
                    };
                    debug!(operation, attempt, ?delay, error = %e, "Retrying commit");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if retry_if(&e) {
                        warn!(operation, attempts = attempt + 1, error = %e, "Commit retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CoreError::Unavailable("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::AlreadyVoided {
                    transaction_id: "t-1".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(CoreError::AlreadyVoided { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = policy(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::ConcurrentModification {
                    entity: "Transaction".into(),
                    id: "t-1".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_when_filters_errors() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = policy(3)
            .run_when(
                "test",
                |e| matches!(e, CoreError::ConcurrentModification { .. }),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::Unavailable("busy".into()))
                },
            )
            .await;

        assert!(matches!(result, Err(CoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
