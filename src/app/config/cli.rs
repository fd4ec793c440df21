use super::groups::{BreakerSettings, QueueSettings, QuotaSettings, RateLimitSettings, RetrySettings};
use super::serde_helpers::{
    load_env_path, load_env_path_opt, load_env_string, load_env_string_opt, load_env_var,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::buffer::BatchConfig;
use crate::pipeline::PipelineConfig;
use crate::reliability::{HealthConfig, QueueConfig};
use crate::sender::ClientConfig;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "http://localhost:9700/v1/errors";
const DEFAULT_QUEUE_PATH: &str = "/tmp/rask-error-forwarder/offline-queue.json";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Error collector endpoint URL
    #[arg(long, env = "ERROR_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// API key sent as X-API-Key
    #[arg(long, env = "ERROR_API_KEY")]
    pub api_key: Option<String>,

    /// Environment stamped on reports that do not carry one
    #[arg(long, env = "ERROR_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Release stamped on reports that do not carry one
    #[arg(long, env = "ERROR_RELEASE")]
    pub release: Option<String>,

    /// Buffer reports into batches before sending
    #[arg(long, env = "ENABLE_BATCHING", default_value_t = true, action = ArgAction::Set)]
    pub enable_batching: bool,

    /// Number of reports per batch
    #[arg(long, env = "BATCH_SIZE", default_value = "10")]
    pub batch_size: usize,

    /// Maximum time a partial batch waits, in milliseconds
    #[arg(long, env = "BATCH_TIMEOUT_MS", default_value = "5000")]
    pub batch_timeout_ms: u64,

    /// Maximum request body size in bytes; larger batches are chunked
    #[arg(long, env = "MAX_PAYLOAD_SIZE", default_value = "1048576")]
    pub max_payload_size: usize,

    /// Pause between chunks of one oversized batch, in milliseconds
    #[arg(long, env = "CHUNK_DELAY_MS", default_value = "100")]
    pub chunk_delay_ms: u64,

    /// Gzip request bodies above the compression threshold
    #[arg(long, env = "ENABLE_COMPRESSION")]
    pub enable_compression: bool,

    /// Body size in bytes above which compression applies
    #[arg(long, env = "COMPRESSION_THRESHOLD", default_value = "1024")]
    pub compression_threshold: usize,

    /// Persist undeliverable reports for later replay
    #[arg(long, env = "ENABLE_OFFLINE_QUEUE", default_value_t = true, action = ArgAction::Set)]
    pub enable_offline_queue: bool,

    /// Offline queue file
    #[arg(long, env = "OFFLINE_QUEUE_PATH", default_value = DEFAULT_QUEUE_PATH)]
    pub queue_path: PathBuf,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SECS", default_value = "5")]
    pub connection_timeout_secs: u64,

    /// Maximum idle HTTP connections
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Quota settings (file or QUOTA_* variables)
    #[arg(skip)]
    pub quota: QuotaSettings,

    #[arg(skip)]
    pub rate_limit: RateLimitSettings,

    #[arg(skip)]
    pub breaker: BreakerSettings,

    #[arg(skip)]
    pub retry: RetrySettings,

    #[arg(skip)]
    pub queue: QueueSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            environment: None,
            release: None,
            enable_batching: true,
            batch_size: 10,
            batch_timeout_ms: 5000,
            max_payload_size: 1024 * 1024,
            chunk_delay_ms: 100,
            enable_compression: false,
            compression_threshold: 1024,
            enable_offline_queue: true,
            queue_path: PathBuf::from(DEFAULT_QUEUE_PATH),
            request_timeout_secs: 10,
            connection_timeout_secs: 5,
            max_connections: 10,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            quota: QuotaSettings::default(),
            rate_limit: RateLimitSettings::default(),
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            queue: QueueSettings::default(),
        }
    }
}

impl Config {
    /// CLI arguments with environment fallbacks. A `--config-file` replaces
    /// both; grouped settings always read their own variables.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if let Some(config_file) = &config.config_file {
            return Self::from_file(config_file);
        }

        let mut config = config;
        config.load_group_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("ERROR_ENDPOINT", &mut config.endpoint);
        load_env_string_opt("ERROR_API_KEY", &mut config.api_key);
        load_env_string_opt("ERROR_ENVIRONMENT", &mut config.environment);
        load_env_string_opt("ERROR_RELEASE", &mut config.release);
        load_env_var("ENABLE_BATCHING", &mut config.enable_batching)?;
        load_env_var("BATCH_SIZE", &mut config.batch_size)?;
        load_env_var("BATCH_TIMEOUT_MS", &mut config.batch_timeout_ms)?;
        load_env_var("MAX_PAYLOAD_SIZE", &mut config.max_payload_size)?;
        load_env_var("CHUNK_DELAY_MS", &mut config.chunk_delay_ms)?;
        load_env_var("ENABLE_COMPRESSION", &mut config.enable_compression)?;
        load_env_var("COMPRESSION_THRESHOLD", &mut config.compression_threshold)?;
        load_env_var("ENABLE_OFFLINE_QUEUE", &mut config.enable_offline_queue)?;
        load_env_path("OFFLINE_QUEUE_PATH", &mut config.queue_path);
        load_env_var("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        load_env_var("CONNECTION_TIMEOUT_SECS", &mut config.connection_timeout_secs)?;
        load_env_var("MAX_CONNECTIONS", &mut config.max_connections)?;
        load_env_var("LOG_LEVEL", &mut config.log_level)?;
        load_env_var("LOG_FORMAT", &mut config.log_format)?;
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        config.load_group_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.load_group_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_group_env(&mut self) -> Result<(), ConfigError> {
        self.quota.load_env()?;
        self.rate_limit.load_env()?;
        self.breaker.load_env()?;
        self.retry.load_env()?;
        self.queue.load_env()
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            client: ClientConfig {
                endpoint: self.endpoint.clone(),
                timeout: Duration::from_secs(self.request_timeout_secs),
                connection_timeout: Duration::from_secs(self.connection_timeout_secs),
                max_connections: self.max_connections,
                api_key: self.api_key.clone(),
                ..ClientConfig::default()
            },
            batching_enabled: self.enable_batching,
            batch: BatchConfig {
                batch_size: self.batch_size,
                batch_timeout: Duration::from_millis(self.batch_timeout_ms),
                max_payload_size: self.max_payload_size,
                chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            },
            compression_enabled: self.enable_compression,
            compression_threshold: self.compression_threshold,
            quota: self.quota.to_quota_config(self.max_payload_size),
            rate_limit: (&self.rate_limit).into(),
            circuit_breaker: (&self.breaker).into(),
            retry: (&self.retry).into(),
            offline_queue_enabled: self.enable_offline_queue,
            queue: QueueConfig {
                path: self.queue_path.clone(),
                max_queue_size: self.queue.max_queue_size,
                max_retries: self.queue.max_retries,
                max_age: self.queue.max_age,
                process_interval: self.queue.process_interval,
            },
            health: HealthConfig::default(),
        }
    }
}
