use super::client::TransportError;
use super::serialization::SerializationError;
use std::time::Duration;
use thiserror::Error;

/// Every way a delivery attempt can end without reaching the collector.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport rate limit reached")]
    RateLimited,
    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(e) => e.is_retryable(),
            DeliveryError::Timeout(_) => true,
            DeliveryError::CircuitOpen
            | DeliveryError::RateLimited
            | DeliveryError::Serialization(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransmissionResult {
    pub status_code: u16,
    pub latency: Duration,
    pub bytes_sent: usize,
    pub report_count: usize,
    pub compressed: bool,
}
