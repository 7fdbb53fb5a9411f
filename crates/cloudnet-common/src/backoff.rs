//! Exponential backoff and the retry loops built on it.
//!
//! The cloud API is eventually consistent: a resource that was just created
//! may be reported as not found by the next call. Callers list the provider
//! error codes that are expected to clear up on their own, and the loop
//! retries only those.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Access to the provider error code carried by an error.
pub trait ErrorCode {
    /// Returns the provider error code, if the error came from the provider.
    fn code(&self) -> Option<&str>;

    /// Returns true if the error code is one of `retryable`.
    fn is_retryable(&self, retryable: &[&str]) -> bool {
        self.code().is_some_and(|code| retryable.contains(&code))
    }
}

/// Returned when the backoff budget runs out without a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out waiting for the condition")]
pub struct WaitTimeout;

/// Exponential backoff policy.
///
/// The delay starts at `initial_interval_ms`, is multiplied by `factor` after
/// every attempt and never exceeds `max_interval_ms`. Once the cap is reached
/// the loop keeps going at the cap until `steps` attempts were made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub initial_interval_ms: u64,
    pub factor: f64,
    /// Each delay is stretched by a random fraction up to `jitter`.
    pub jitter: f64,
    pub max_interval_ms: u64,
    /// Maximum number of attempts.
    pub steps: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            factor: 2.0,
            jitter: 0.1,
            max_interval_ms: 20_000,
            steps: 32,
        }
    }
}

impl Backoff {
    /// Backoff without any delay between `steps` attempts.
    pub fn immediate(steps: u32) -> Self {
        Self {
            initial_interval_ms: 0,
            factor: 1.0,
            jitter: 0.0,
            max_interval_ms: 0,
            steps,
        }
    }

    /// Delay before attempt `step + 1`, without jitter.
    pub fn delay(&self, step: u32) -> Duration {
        let cap = self.max_interval_ms as f64;
        let mut delay = self.initial_interval_ms as f64;
        for _ in 0..step {
            delay *= self.factor;
            if delay >= cap {
                break;
            }
        }
        Duration::from_millis(delay.min(cap) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        delay.mul_f64(1.0 + extra)
    }
}

/// Runs `op` until it yields a value, retrying while the error code is in
/// `retryable`.
///
/// A non-retryable error is returned immediately. When the budget runs out,
/// the last retryable error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    backoff: &Backoff,
    retryable: &[&str],
    mut op: F,
) -> Result<T, E>
where
    E: ErrorCode + From<WaitTimeout>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    poll(backoff, retryable, || {
        let fut = op();
        async move { fut.await.map(Some) }
    })
    .await
}

/// Polls `condition` until it reports done.
///
/// `Ok(false)` means not done yet. Errors whose code is in `retryable` are
/// remembered and polling continues; any other error is returned at once.
/// On exhaustion the last retryable error is returned, or [`WaitTimeout`]
/// if polling never saw one.
pub async fn wait_for_with_retryable<E, F, Fut>(
    backoff: &Backoff,
    retryable: &[&str],
    mut condition: F,
) -> Result<(), E>
where
    E: ErrorCode + From<WaitTimeout>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll(backoff, retryable, || {
        let fut = condition();
        async move { fut.await.map(|done| done.then_some(())) }
    })
    .await
}

async fn poll<T, E, F, Fut>(backoff: &Backoff, retryable: &[&str], mut attempt: F) -> Result<T, E>
where
    E: ErrorCode + From<WaitTimeout>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let steps = backoff.steps.max(1);
    let mut last_retryable: Option<E> = None;

    for step in 0..steps {
        match attempt().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) if err.is_retryable(retryable) => {
                debug!(attempt = step + 1, code = ?err.code(), "retryable error, backing off");
                last_retryable = Some(err);
            }
            Err(err) => return Err(err),
        }

        if step + 1 < steps {
            let delay = backoff.jittered(backoff.delay(step));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_retryable.unwrap_or_else(|| E::from(WaitTimeout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Code(&'static str),
        Timeout,
    }

    impl ErrorCode for TestError {
        fn code(&self) -> Option<&str> {
            match self {
                TestError::Code(code) => Some(*code),
                TestError::Timeout => None,
            }
        }
    }

    impl From<WaitTimeout> for TestError {
        fn from(_: WaitTimeout) -> Self {
            TestError::Timeout
        }
    }

    #[test]
    fn test_default_delays() {
        let b = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|s| b.delay(s).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 20, 20, 20]);
    }

    #[test]
    fn test_jitter_bounds() {
        let b = Backoff::default();
        for _ in 0..100 {
            let d = b.jittered(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(10));
            assert!(d < Duration::from_secs(11));
        }
    }

    #[tokio::test]
    async fn test_retryable_error_then_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TestError> =
            wait_for_with_retryable(&Backoff::immediate(5), &["Retry.Me"], move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError::Code("Retry.Me"))
                } else {
                    Ok(true)
                }
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TestError> =
            wait_for_with_retryable(&Backoff::immediate(5), &["Retry.Me"], move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Code("Fatal"))
            })
            .await;

        assert_eq!(result, Err(TestError::Code("Fatal")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_retryable_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TestError> =
            wait_for_with_retryable(&Backoff::immediate(3), &["Retry.Me"], move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Code("Retry.Me"))
            })
            .await;

        assert_eq!(result, Err(TestError::Code("Retry.Me")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_without_error_is_timeout() {
        let result: Result<(), TestError> =
            wait_for_with_retryable(&Backoff::immediate(3), &[], || async { Ok(false) }).await;
        assert_eq!(result, Err(TestError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let backoff = Backoff {
            jitter: 0.0,
            steps: 4,
            ..Backoff::default()
        };
        let result: Result<u32, TestError> =
            retry_with_backoff(&backoff, &["Retry.Me"], || async {
                Err(TestError::Code("Retry.Me"))
            })
            .await;

        assert_eq!(result, Err(TestError::Code("Retry.Me")));
        // 1s + 2s + 4s between four attempts
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_retry_returns_value() {
        let result: Result<&str, TestError> =
            retry_with_backoff(&Backoff::immediate(2), &[], || async { Ok("nat-1") }).await;
        assert_eq!(result, Ok("nat-1"));
    }
}
