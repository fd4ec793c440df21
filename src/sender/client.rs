use super::serialization::Payload;
use super::transmission::TransmissionResult;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Coarse classification of network-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionReset,
    ConnectionRefused,
    TimedOut,
    Other,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error ({kind:?}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },
}

impl TransportError {
    /// Built-in retry classification.
    ///
    /// Reset, refused and timed-out connections plus HTTP 408/429/502/503/504 are
    /// transient. Every other 4xx (401 and 403 included) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network { kind, .. } => !matches!(kind, NetworkErrorKind::Other),
            TransportError::Http { status, .. } => matches!(status, 408 | 429 | 502 | 503 | 504),
            TransportError::InvalidConfiguration(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return TransportError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        let kind = if error.is_timeout() {
            NetworkErrorKind::TimedOut
        } else {
            match io_error_kind(&error) {
                Some(std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe) => {
                    NetworkErrorKind::ConnectionReset
                }
                Some(std::io::ErrorKind::ConnectionRefused) => NetworkErrorKind::ConnectionRefused,
                Some(std::io::ErrorKind::TimedOut) => NetworkErrorKind::TimedOut,
                _ if error.is_connect() => NetworkErrorKind::ConnectionRefused,
                _ => NetworkErrorKind::Other,
            }
        };

        TransportError::Network {
            kind,
            message: error.to_string(),
        }
    }
}

fn io_error_kind(error: &(dyn std::error::Error + 'static)) -> Option<std::io::ErrorKind> {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = err.source();
    }
    None
}

/// Outbound side of the pipeline: delivers one encoded payload to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Result<TransmissionResult, TransportError>;

    async fn health_check(&self) -> Result<(), TransportError>;

    fn endpoint(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub api_key: Option<String>,
    pub health_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9700/v1/errors".to_string(),
            timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("rask-error-forwarder/{}", env!("CARGO_PKG_VERSION")),
            api_key: None,
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bytes_sent: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_sent: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, bytes: usize, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// reqwest-backed transport posting JSON bodies to the collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
    endpoint_url: Url,
    headers: HeaderMap,
    stats: Arc<ClientStats>,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let endpoint_url: Url = config.endpoint.parse().map_err(|e| {
            TransportError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .build()
            .map_err(|e| {
                TransportError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        let headers = Self::build_headers(&config)?;

        Ok(Self {
            client,
            config,
            endpoint_url,
            headers,
            stats: Arc::new(ClientStats::default()),
        })
    }

    fn build_headers(config: &ClientConfig) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| {
                TransportError::InvalidConfiguration(format!("Invalid user agent: {e}"))
            })?,
        );
        headers.insert(
            HeaderName::from_static("x-forwarder-version"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        if let Some(api_key) = &config.api_key {
            let mut value = HeaderValue::from_str(api_key).map_err(|e| {
                TransportError::InvalidConfiguration(format!("Invalid API key: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }

        Ok(headers)
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<TransmissionResult, TransportError> {
        let start = Instant::now();

        let result = self
            .client
            .post(self.endpoint_url.clone())
            .headers(self.headers.clone())
            .body(payload.body().to_vec())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_request(false, 0, start.elapsed());
                return Err(TransportError::from(e));
            }
        };

        let latency = start.elapsed();
        let status = response.status();
        self.stats
            .record_request(status.is_success(), payload.len(), latency);

        if status.is_success() {
            tracing::debug!(
                reports = payload.report_count(),
                bytes = payload.len(),
                ?latency,
                "Delivered payload"
            );
            Ok(TransmissionResult {
                status_code: status.as_u16(),
                latency,
                bytes_sent: payload.len(),
                report_count: payload.report_count(),
                compressed: payload.is_compressed(),
            })
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(TransportError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let mut health_url = self.endpoint_url.clone();
        health_url.set_path(&self.config.health_path);

        let start = Instant::now();
        let response = self.client.get(health_url).send().await?;
        let success = response.status().is_success();
        self.stats.record_request(success, 0, start.elapsed());

        if success {
            Ok(())
        } else {
            Err(TransportError::Http {
                status: response.status().as_u16(),
                message: format!("Health check failed: {}", response.status()),
            })
        }
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
