use super::ConfigError;
use super::serde_helpers::{load_env_duration_ms, load_env_var};
use crate::reliability::{
    CircuitBreakerConfig, CountMode, QuotaConfig, RateLimitConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSettings {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub burst_limit: usize,
    #[serde(with = "super::serde_helpers")]
    pub burst_window: Duration,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            daily_limit: 1000,
            monthly_limit: 10_000,
            burst_limit: 50,
            burst_window: Duration::from_secs(60),
        }
    }
}

impl QuotaSettings {
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        load_env_var("QUOTA_DAILY_LIMIT", &mut self.daily_limit)?;
        load_env_var("QUOTA_MONTHLY_LIMIT", &mut self.monthly_limit)?;
        load_env_var("QUOTA_BURST_LIMIT", &mut self.burst_limit)?;
        load_env_duration_ms("QUOTA_BURST_WINDOW_MS", &mut self.burst_window)
    }

    pub fn to_quota_config(&self, max_payload_size: usize) -> QuotaConfig {
        QuotaConfig {
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            burst_limit: self.burst_limit,
            burst_window: self.burst_window,
            max_payload_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    #[serde(with = "super::serde_helpers")]
    pub window: Duration,
    pub max_requests: usize,
    pub count_mode: CountMode,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            count_mode: CountMode::All,
        }
    }
}

impl RateLimitSettings {
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        load_env_duration_ms("RATE_LIMIT_WINDOW_MS", &mut self.window)?;
        load_env_var("RATE_LIMIT_MAX_REQUESTS", &mut self.max_requests)
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            window: settings.window,
            max_requests: settings.max_requests,
            count_mode: settings.count_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    #[serde(with = "super::serde_helpers")]
    pub reset_timeout: Duration,
    #[serde(with = "super::serde_helpers")]
    pub call_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerSettings {
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        load_env_var("BREAKER_FAILURE_THRESHOLD", &mut self.failure_threshold)?;
        load_env_duration_ms("BREAKER_RESET_TIMEOUT_MS", &mut self.reset_timeout)?;
        load_env_duration_ms("BREAKER_CALL_TIMEOUT_MS", &mut self.call_timeout)
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: settings.reset_timeout,
            call_timeout: settings.call_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "super::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "super::serde_helpers")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
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

impl RetrySettings {
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        load_env_var("RETRY_MAX_ATTEMPTS", &mut self.max_attempts)?;
        load_env_duration_ms("RETRY_BASE_DELAY_MS", &mut self.base_delay)?;
        load_env_duration_ms("RETRY_MAX_DELAY_MS", &mut self.max_delay)?;
        load_env_var("RETRY_EXPONENTIAL_BASE", &mut self.exponential_base)?;
        load_env_var("RETRY_JITTER", &mut self.jitter)
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub max_retries: u32,
    #[serde(with = "super::serde_helpers")]
    pub max_age: Duration,
    #[serde(with = "super::serde_helpers")]
    pub process_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_retries: 5,
            max_age: Duration::from_secs(24 * 3600),
            process_interval: Duration::from_secs(30),
        }
    }
}

impl QueueSettings {
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        load_env_var("QUEUE_MAX_SIZE", &mut self.max_queue_size)?;
        load_env_var("QUEUE_MAX_RETRIES", &mut self.max_retries)?;
        load_env_duration_ms("QUEUE_MAX_AGE_MS", &mut self.max_age)?;
        load_env_duration_ms("QUEUE_PROCESS_INTERVAL_MS", &mut self.process_interval)
    }
}
