//! Exponential backoff retry with jitter.
//!
//! Only errors that declare themselves [`Retryable::is_retryable`] trigger a
//! retry; every other error propagates on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// An error type the retry wrapper and circuit breaker can reason about.
pub trait Retryable {
    /// Whether this error belongs to the "expected, transient" class that
    /// should be retried (and that counts against the circuit breaker).
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Delay before attempt `attempt` (1-indexed; the attempt that just failed).
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.exponential_base.powi((attempt - 1) as i32);
    let base_secs = (config.initial_delay.as_secs_f64() * exp).min(config.max_delay.as_secs_f64());
    let secs = if config.jitter {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        base_secs * jitter
    } else {
        base_secs
    };
    Duration::from_secs_f64(secs.max(0.0))
}

/// Retry `f` up to `config.max_attempts` times, sleeping with exponential
/// backoff plus jitter between attempts. Stops immediately on a
/// non-retryable error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_retryable() || attempt >= config.max_attempts {
                    return Err(err);
                }
                let delay = backoff_delay(config, attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(bool);

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_attempts_then_gives_up() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            exponential_base: 2.0,
            jitter: false,
        };

        let result: Result<(), TestError> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(true)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), TestError> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(false)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_on_second_attempt_stops_retrying() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };

        let result: Result<u32, TestError> = with_retry(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TestError(true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
