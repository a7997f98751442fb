//! Three-state circuit breaker guarding a flaky downstream call.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::retry::Retryable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Wraps calls with `Closed -> Open -> HalfOpen -> Closed` state tracking.
///
/// Only [`Retryable::is_retryable`] errors count as a breaker failure;
/// everything else passes through untouched, per the same "expected
/// exception" class the retry wrapper recognizes.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state, for diagnostics/tests only.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.state == State::Open
    }

    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == State::Open {
                let elapsed = inner.last_failure.map(|t| t.elapsed());
                if elapsed.is_some_and(|e| e < self.config.recovery_timeout) {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                inner.state = State::HalfOpen;
            }
        }

        match f().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.on_failure().await;
                }
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = State::Closed;
        inner.failures = 0;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
            }
            State::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = State::Open;
                }
            }
            State::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestError(bool);

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        });

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(TestError(true)) })
                .await;
            assert!(!breaker.is_open().await);
        }

        let _ = breaker
            .call(|| async { Err::<(), _>(TestError(true)) })
            .await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling_inner() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        let _ = breaker
            .call(|| async { Err::<(), _>(TestError(true)) })
            .await;
        assert!(breaker.is_open().await);

        let mut called = false;
        let result = breaker
            .call(|| {
                called = true;
                async { Ok::<(), TestError>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
        assert!(!called);
    }

    #[tokio::test]
    async fn non_retryable_failure_does_not_open_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        let _ = breaker
            .call(|| async { Err::<(), _>(TestError(false)) })
            .await;
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn half_open_success_closes_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(1),
        });
        let _ = breaker
            .call(|| async { Err::<(), _>(TestError(true)) })
            .await;
        assert!(breaker.is_open().await);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = breaker.call(|| async { Ok::<_, TestError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert!(!breaker.is_open().await);
    }
}
