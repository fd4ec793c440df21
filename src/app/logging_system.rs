use super::config::{LogFormat, LogLevel};
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Targets that are too chatty at the forwarder's own level.
const DEFAULT_DIRECTIVES: &[(&str, LogLevel)] = &[
    ("hyper", LogLevel::Warn),
    ("hyper_util", LogLevel::Warn),
    ("reqwest", LogLevel::Warn),
    ("h2", LogLevel::Warn),
    ("rustls", LogLevel::Warn),
];

#[derive(Error, Debug, Clone)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },
    #[error("Failed to install tracing subscriber: {0}")]
    InitFailed(String),
}

pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(DEFAULT_DIRECTIVES.len() + 1);
    parts.push(level.as_str().to_string());
    for (target, target_level) in DEFAULT_DIRECTIVES {
        parts.push(format!("{target}={}", target_level.as_str()));
    }
    parts.join(",")
}

fn install(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let filter_string = build_filter_string(level);
    let env_filter =
        EnvFilter::try_new(&filter_string).map_err(|e| LoggingError::InvalidFilter {
            filter: filter_string.clone(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
    };

    result.map_err(|e| LoggingError::InitFailed(e.to_string()))
}

/// Installs the global subscriber once. Later calls return the first result.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();
    INIT.get_or_init(|| install(level, format)).clone()
}
