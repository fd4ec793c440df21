use crate::sender::DeliveryError;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Releases a half-open trial slot if the call future is dropped unsettled.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Runs `op` under the breaker and the per-call timeout.
    ///
    /// While open, and before `reset_timeout` has passed since the last
    /// failure, fails with `DeliveryError::CircuitOpen` without calling `op`.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let trial = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };

        let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.call_timeout)),
        };

        guard.armed = false;
        match &result {
            Ok(_) => self.on_success(),
            Err(error) => self.on_failure(error),
        }

        result
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
    }

    /// Returns whether this call is the half-open trial.
    fn acquire(&self) -> Result<bool, DeliveryError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.reset_timeout);
                if cooled_down {
                    tracing::info!("Circuit breaker half-open, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(true)
                } else {
                    Err(DeliveryError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(DeliveryError::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self, error: &DeliveryError) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(%error, "Circuit breaker trial failed, reopening");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    failures = inner.failure_count,
                    %error,
                    "Circuit breaker opened"
                );
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        })
    }

    fn server_error() -> DeliveryError {
        DeliveryError::Transport(TransportError::Http {
            status: 503,
            message: "unavailable".to_string(),
        })
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DeliveryError> {
        breaker
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(server_error())
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DeliveryError> {
        breaker
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);

        for _ in 0..4 {
            assert!(fail(&breaker, &calls).await.is_err());
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        tokio::time::advance(Duration::from_secs(10)).await;
        let result = succeed(&breaker, &calls).await;
        assert!(matches!(result, Err(DeliveryError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&breaker, &calls).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restarts_timer() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);
        for _ in 0..5 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 6);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(
            succeed(&breaker, &calls).await,
            Err(DeliveryError::CircuitOpen)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_millis(100),
        });

        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, DeliveryError>(())
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::Timeout(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let breaker = breaker();
        let calls = AtomicU32::new(0);
        for _ in 0..4 {
            let _ = fail(&breaker, &calls).await;
        }
        assert!(succeed(&breaker, &calls).await.is_ok());
        assert_eq!(breaker.failure_count(), 0);

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
