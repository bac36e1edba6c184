//! Generic retry wrapper with exponential backoff and cooperative
//! cancellation.
//!
//! Wraps any fallible async operation: on failure the operation is retried
//! with backoff `min(max_delay, initial_delay * base^attempt)` until it
//! succeeds or the attempt budget runs out. A cancellation observed during
//! the operation or during a backoff sleep surfaces as a distinct failure,
//! never as exhaustion.

use std::future::Future;
use std::time::Duration;

use ema_config::RetryConfig;
use tokio_util::sync::CancellationToken;

/// Retry behavior for one wrapped operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// When false, callers skip the wrapper entirely (pass-through).
    pub enabled: bool,
    /// Total attempt budget, including the first call.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// Backoff before the attempt after `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay =
            self.initial_delay.as_millis() as f64 * self.exponential_base.powi(attempt as i32);
        let delay = delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
        }
    }
}

/// Why a wrapped operation failed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation observed during the operation or a backoff sleep.
    Cancelled,
    /// The attempt budget ran out; `last` is the final error.
    Exhausted { attempts: u32, last: E },
}

/// Run `op` under `policy`, consulting `cancel` at every suspension point.
///
/// `on_retry` is invoked before each backoff sleep with the 0-based attempt
/// number, the error, and the chosen delay; it is for observability only.
/// Callers gate on `policy.enabled` — a disabled policy means the wrapper
/// should not be entered at all.
pub async fn retry<T, E, Op, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(u32, &E, Duration),
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_retries.max(1);

    for attempt in 0..attempts {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op() => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                // An error produced by the cancellation itself is not worth
                // retrying
                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled);
                }
                if attempt + 1 == attempts {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: error,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                on_retry(attempt, &error, delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    unreachable!("attempt loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            exponential_base: 2.0,
        }
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            exponential_base: 2.0,
        };
        // 100 * 2^3 = 800, capped at 500
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            enabled: true,
            max_retries: 7,
            initial_delay_ms: 250,
            max_delay_ms: 60_000,
            exponential_base: 3.0,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.exponential_base, 3.0);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let cancel = CancellationToken::new();
        let result: Result<i32, RetryError<String>> =
            retry(&fast_policy(3), &cancel, |_, _, _| {}, || async { Ok(42) }).await;
        assert!(matches!(result, Ok(42)));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<i32, RetryError<String>> =
            retry(&fast_policy(3), &cancel, |_, _, _| {}, move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_carries_attempts_and_last_error() {
        let cancel = CancellationToken::new();
        let result: Result<i32, RetryError<String>> =
            retry(&fast_policy(3), &cancel, |_, _, _| {}, || async {
                Err("still broken".to_string())
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "still broken");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn on_retry_sees_every_backoff() {
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        let _: Result<i32, RetryError<String>> =
            retry(
                &fast_policy(3),
                &cancel,
                |attempt, _, delay| seen.push((attempt, delay)),
                || async { Err("x".to_string()) },
            )
            .await;

        // Two sleeps for three attempts
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
    }

    #[tokio::test]
    async fn cancellation_during_sleep_is_distinct() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(3600),
            ..fast_policy(3)
        };

        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });

        let result: Result<i32, RetryError<String>> =
            retry(&policy, &cancel, |_, _, _| {}, || async {
                Err("fail once".to_string())
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_during_operation_is_distinct() {
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });

        let result: Result<i32, RetryError<String>> =
            retry(&fast_policy(3), &cancel, |_, _, _| {}, || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
