//! Exponential backoff around fallible async operations.
//!
//! Attempt 0 runs immediately; attempt k (1-indexed from there) waits
//! `min(base_delay * 2^(k-1), MAX_BACKOFF)` first. The first success
//! wins; otherwise the last error is returned unchanged so the caller
//! still sees the most specific kind.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ProbeError, Result};

/// Upper bound on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_millis(2000);

/// Bounded-attempt retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, at least 1.
    pub attempts: u32,
    /// Delay before the second attempt; doubles each round.
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Backoff before the given 1-indexed retry attempt.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(10);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(MAX_BACKOFF)
    }

    /// Runs `op` up to `attempts` times. Cancellation during a backoff
    /// wait aborts with `Cancelled`; non-retryable errors end the loop
    /// early.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                let delay = self.delay_before(attempt);
                debug!(attempt, ?delay, "retrying probe after backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                }
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let give_up = !err.is_retryable();
                    last_err = Some(err);
                    if give_up {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProbeError::internal("retry loop ran zero attempts")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn delay_schedule_doubles_and_caps() {
        let policy = RetryPolicy::new(8, Duration::from_millis(100));
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before(3), Duration::from_millis(400));
        assert_eq!(policy.delay_before(6), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_op_runs_exactly_n_times() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let start = Instant::now();
        let result: Result<()> = policy
            .run(&CancellationToken::new(), || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(ProbeError::DialFail("refused".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(ProbeError::DialFail(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        // 100 + 200 + 400 ms of virtual sleep.
        let slept = start.elapsed();
        assert!(slept >= Duration::from_millis(700));
        assert!(slept < Duration::from_millis(735));
    }

    #[tokio::test]
    async fn fail_twice_then_succeed() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = policy
            .run(&CancellationToken::new(), || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(ProbeError::Timeout)
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn bad_link_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = policy
            .run(&CancellationToken::new(), || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(ProbeError::BadLink("garbage".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(ProbeError::BadLink(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_wait_aborts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel2.cancel();
        });
        let result: Result<()> = policy
            .run(&cancel, || async { Err(ProbeError::Timeout) })
            .await;
        assert!(matches!(result, Err(ProbeError::Cancelled)));
    }
}
