use crate::sender::DeliveryError;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&DeliveryError) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub successful_after_retry: u64,
    pub exhausted: u64,
    pub aborted_non_retryable: u64,
    pub completed_operations: u64,
    pub average_attempts: f64,
}

pub struct RetryManager {
    config: RetryConfig,
    predicate: RetryPredicate,
    stats: Mutex<RetryStats>,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(DeliveryError::is_retryable),
            stats: Mutex::new(RetryStats::default()),
        }
    }

    /// Replaces the built-in retry classification.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before attempt `attempt` (1-based). The first attempt never waits.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2) as i32;
        let base_millis = self.config.base_delay.as_millis() as f64;
        let millis = base_millis * self.config.exponential_base.powi(exponent);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);

        if self.config.jitter {
            let factor = rand::rng().random_range(0.5..=1.0);
            Duration::from_millis((capped * factor) as u64)
        } else {
            Duration::from_millis(capped as u64)
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is used up. Returns the last observed error on failure.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut op: F) -> Result<T, DeliveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeliveryError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if attempt > 1 {
                let delay = self.calculate_delay(attempt);
                tracing::debug!(attempt, ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            self.stats.lock().total_attempts += 1;

            match op().await {
                Ok(value) => {
                    self.complete(attempt, |stats| {
                        if attempt > 1 {
                            stats.successful_after_retry += 1;
                        }
                    });
                    return Ok(value);
                }
                Err(error) if !(self.predicate)(&error) => {
                    tracing::debug!(attempt, %error, "Non-retryable delivery error");
                    self.complete(attempt, |stats| stats.aborted_non_retryable += 1);
                    return Err(error);
                }
                Err(error) if attempt >= max_attempts => {
                    tracing::warn!(attempts = attempt, %error, "Retry attempts exhausted");
                    self.complete(attempt, |stats| stats.exhausted += 1);
                    return Err(error);
                }
                Err(error) => {
                    tracing::info!(attempt, %error, "Delivery attempt failed, will retry");
                    attempt += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    fn complete(&self, attempts: u32, update: impl FnOnce(&mut RetryStats)) {
        let mut stats = self.stats.lock();
        update(&mut stats);
        stats.completed_operations += 1;
        let n = stats.completed_operations as f64;
        stats.average_attempts += (attempts as f64 - stats.average_attempts) / n;
    }
}
