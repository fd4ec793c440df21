use super::{Config, ConfigError};
use url::Url;

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfig(message.to_string()))
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint must use http or https: {}",
                self.endpoint
            )));
        }

        require(self.batch_size > 0, "Batch size must be greater than 0")?;
        require(self.batch_timeout_ms > 0, "Batch timeout must be greater than 0")?;
        require(
            self.max_payload_size > 0,
            "Max payload size must be greater than 0",
        )?;
        require(
            self.request_timeout_secs > 0 && self.connection_timeout_secs > 0,
            "Timeouts must be greater than 0",
        )?;

        require(self.quota.daily_limit > 0, "Daily quota must be greater than 0")?;
        require(
            self.quota.monthly_limit >= self.quota.daily_limit,
            "Monthly quota must be at least the daily quota",
        )?;
        require(self.quota.burst_limit > 0, "Burst limit must be greater than 0")?;
        require(
            !self.quota.burst_window.is_zero(),
            "Burst window must be greater than 0",
        )?;

        require(
            self.rate_limit.max_requests > 0 && !self.rate_limit.window.is_zero(),
            "Rate limit window and max requests must be greater than 0",
        )?;

        require(
            self.breaker.failure_threshold > 0,
            "Circuit breaker failure threshold must be greater than 0",
        )?;
        require(
            !self.breaker.call_timeout.is_zero(),
            "Circuit breaker call timeout must be greater than 0",
        )?;

        require(
            self.retry.max_attempts > 0,
            "Retry max attempts must be greater than 0",
        )?;
        require(
            self.retry.exponential_base >= 1.0,
            "Retry exponential base must be at least 1.0",
        )?;
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry base delay ({:?}) exceeds max delay ({:?})",
                self.retry.base_delay, self.retry.max_delay
            )));
        }

        if self.enable_offline_queue {
            require(
                self.queue.max_queue_size > 0,
                "Offline queue size must be greater than 0",
            )?;
            require(
                self.queue.max_retries > 0,
                "Offline queue max retries must be greater than 0",
            )?;
            require(
                !self.queue.process_interval.is_zero(),
                "Offline queue process interval must be greater than 0",
            )?;
        }

        Ok(())
    }
}
