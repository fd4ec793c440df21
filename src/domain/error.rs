use thiserror::Error;

/// Top-level error type for constructing and running the reporter.
///
/// Delivery failures never surface through this type; they are routed into the
/// offline queue or an `EventSink`.
#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
