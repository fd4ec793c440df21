#[cfg(feature = "metrics")]
use prometheus::{Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Metrics encoding error: {0}")]
    EncodingError(String),
}

/// Where a report ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Queued,
    Rejected,
    Dropped,
}

impl ReportOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ReportOutcome::Sent => "sent",
            ReportOutcome::Queued => "queued",
            ReportOutcome::Rejected => "rejected",
            ReportOutcome::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub reports_sent: u64,
    pub reports_queued: u64,
    pub reports_rejected: u64,
    pub reports_dropped: u64,
    pub retries: u64,
    pub queue_size: u64,
    pub circuit_state: f64,
}

#[cfg(feature = "metrics")]
#[derive(Clone)]
struct PrometheusMetrics {
    registry: Registry,
    reports: CounterVec,
    retries: Counter,
    queue_size: Gauge,
    circuit_state: Gauge,
}

#[cfg(feature = "metrics")]
impl PrometheusMetrics {
    fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let reports = CounterVec::new(
            prometheus::Opts::new("rask_error_reports_total", "Error reports by outcome"),
            &["outcome"], // sent, queued, rejected, dropped
        )?;
        registry.register(Box::new(reports.clone()))?;

        let retries = Counter::new(
            "rask_error_retries_total",
            "Delivery attempts beyond the first",
        )?;
        registry.register(Box::new(retries.clone()))?;

        let queue_size = Gauge::new("rask_error_queue_size", "Reports held in the offline queue")?;
        registry.register(Box::new(queue_size.clone()))?;

        let circuit_state = Gauge::new(
            "rask_error_circuit_state",
            "Circuit breaker state (0 closed, 1 half-open, 2 open)",
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            registry,
            reports,
            retries,
            queue_size,
            circuit_state,
        })
    }
}

#[derive(Clone)]
pub struct MetricsCollector {
    #[cfg(feature = "metrics")]
    prometheus: PrometheusMetrics,
    state: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            #[cfg(feature = "metrics")]
            prometheus: PrometheusMetrics::new()?,
            state: Arc::new(Mutex::new(MetricsSnapshot::default())),
        })
    }

    pub fn record_reports(&self, outcome: ReportOutcome, count: usize) {
        if count == 0 {
            return;
        }

        #[cfg(feature = "metrics")]
        self.prometheus
            .reports
            .with_label_values(&[outcome.label()])
            .inc_by(count as f64);

        let mut state = self.state.lock();
        let count = count as u64;
        match outcome {
            ReportOutcome::Sent => state.reports_sent += count,
            ReportOutcome::Queued => state.reports_queued += count,
            ReportOutcome::Rejected => state.reports_rejected += count,
            ReportOutcome::Dropped => state.reports_dropped += count,
        }
    }

    pub fn record_retries(&self, retries: u64) {
        if retries == 0 {
            return;
        }

        #[cfg(feature = "metrics")]
        self.prometheus.retries.inc_by(retries as f64);

        self.state.lock().retries += retries;
    }

    pub fn set_queue_size(&self, size: usize) {
        #[cfg(feature = "metrics")]
        self.prometheus.queue_size.set(size as f64);

        self.state.lock().queue_size = size as u64;
    }

    pub fn set_circuit_state(&self, gauge: f64) {
        #[cfg(feature = "metrics")]
        self.prometheus.circuit_state.set(gauge);

        self.state.lock().circuit_state = gauge;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().clone()
    }

    /// Prometheus text exposition of every registered metric.
    #[cfg(feature = "metrics")]
    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }

    #[cfg(not(feature = "metrics"))]
    pub fn export(&self) -> Result<String, MetricsError> {
        Ok("# Metrics disabled\n".to_string())
    }
}
