//! Retry schedules and cancellable waits
//!
//! Every delayed step in the scanner (liveness re-checks, forced refreshes,
//! recovery) goes through here so a closed session cancels it promptly.

use crate::errors::ScannerError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Delay before retry number `attempt` (1-based; attempt 1 is the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * (self.multiplier as f64).powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out of
    /// attempts, or `cancel` fires. `retryable` decides which errors are retried.
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        retryable: R,
        mut op: F,
    ) -> Result<T, ScannerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScannerError>>,
        R: Fn(&ScannerError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ScannerError::Cancelled);
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    log::debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    sleep_or_cancel(delay, cancel).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), ScannerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ScannerError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let counter = calls.clone();

        let result = policy
            .run(&cancel, |e| e.is_transient(), move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ScannerError::RenderFault("zero size".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_immediate() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy
            .run(&cancel, |e| e.is_transient(), |_| async {
                Err(ScannerError::PermissionDenied("denied".into()))
            })
            .await;
        assert!(matches!(result, Err(ScannerError::PermissionDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy
            .run(&cancel, |_| true, |attempt| async move {
                Err(ScannerError::RenderFault(format!("attempt {}", attempt)))
            })
            .await;
        assert_eq!(result, Err(ScannerError::RenderFault("attempt 3".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sleep_or_cancel(Duration::from_secs(60), &cancel).await;
        assert_eq!(result, Err(ScannerError::Cancelled));
    }
}
