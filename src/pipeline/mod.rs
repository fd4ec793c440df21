//! Delivery orchestration: admission, batching, rate gating, breaker-wrapped
//! retries and the offline queue, wired in that order.

pub mod sink;

pub use sink::{ChannelSink, DeliveryFailure, EventSink, PipelineEvent, PipelineWarning, TracingSink};

use crate::buffer::{BatchConfig, BatchManager, BatchOutcome, ChunkSender};
use crate::domain::{Report, ReporterError};
use crate::reliability::health::{QUEUE_COMPONENT, TRANSPORT_COMPONENT};
use crate::reliability::{
    Calendar, CircuitBreaker, CircuitBreakerConfig, CircuitState, ComponentHealth, DrainSummary,
    HealthConfig, HealthMonitor, HealthReport, LocalCalendar, MetricsCollector, MetricsSnapshot,
    OfflineQueue, QueueConfig, QuotaConfig, QuotaManager, QuotaUsage, RateLimitConfig,
    RateLimiter, ReportOutcome, RetryConfig, RetryManager, RetryStats,
};
use crate::sanitize::{KeyRedactor, Sanitizer};
use crate::sender::{ClientConfig, Compressor, DeliveryError, HttpTransport, PayloadBuilder, Transport};
use async_trait::async_trait;
use futures::future;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub client: ClientConfig,
    pub batching_enabled: bool,
    pub batch: BatchConfig,
    pub compression_enabled: bool,
    pub compression_threshold: usize,
    pub quota: QuotaConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub offline_queue_enabled: bool,
    pub queue: QueueConfig,
    pub health: HealthConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            batching_enabled: true,
            batch: BatchConfig::default(),
            compression_enabled: false,
            compression_threshold: 1024,
            quota: QuotaConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            offline_queue_enabled: true,
            queue: QueueConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// What happened to a captured report by the time `capture` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Buffered,
    Queued { reason: String },
    Dropped { reason: String },
}

/// Sends chunks through the rate window, breaker and retry policy, and salvages
/// whatever fails into the offline queue.
struct Deliverer {
    payloads: PayloadBuilder,
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryManager,
    quota: Arc<QuotaManager>,
    queue: Option<Arc<OfflineQueue>>,
    sink: Arc<dyn EventSink>,
    metrics: MetricsCollector,
    health: Arc<HealthMonitor>,
}

impl Deliverer {
    /// Breaker around retry around one transport call. No admission checks.
    async fn deliver(&self, reports: &[Report]) -> Result<(), DeliveryError> {
        let payload = self.payloads.build(reports)?;
        let attempts = AtomicU32::new(0);

        let transport = &self.transport;
        let retry = &self.retry;
        let payload = &payload;
        let attempts_ref = &attempts;

        let result = self
            .breaker
            .execute(move || {
                retry.execute_with_retry(move || async move {
                    attempts_ref.fetch_add(1, Ordering::Relaxed);
                    transport.send(payload).await.map_err(DeliveryError::from)
                })
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        self.metrics
            .record_retries(u64::from(attempts.saturating_sub(1)));
        self.metrics.set_circuit_state(self.breaker.state().as_gauge());

        match &result {
            Ok(_) => {
                self.rate_limiter.record_outcome(true);
                for report in reports {
                    self.quota.record_usage(report.serialized_size());
                }
                self.metrics.record_reports(ReportOutcome::Sent, reports.len());
                self.health.record_check(TRANSPORT_COMPONENT, true);
            }
            Err(error) => {
                self.rate_limiter.record_outcome(false);
                if attempts > 0 {
                    self.health.record_check(TRANSPORT_COMPONENT, false);
                }
                tracing::warn!(reports = reports.len(), attempts, %error, "Delivery failed");
            }
        }

        result.map(|_| ())
    }

    /// Hands undeliverable reports to the queue, or reports them lost.
    async fn salvage(&self, reports: Vec<Report>, reason: &str) -> DeliveryOutcome {
        match &self.queue {
            Some(queue) => {
                self.metrics.record_reports(ReportOutcome::Queued, reports.len());
                queue.enqueue_all(reports).await;
                self.metrics.set_queue_size(queue.size());
                DeliveryOutcome::Queued {
                    reason: reason.to_string(),
                }
            }
            None => {
                self.metrics.record_reports(ReportOutcome::Dropped, reports.len());
                self.sink.notify_error(&DeliveryFailure {
                    report_ids: reports.into_iter().map(|r| r.id).collect(),
                    message: reason.to_string(),
                });
                DeliveryOutcome::Dropped {
                    reason: reason.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl ChunkSender for Deliverer {
    async fn send_chunk(&self, chunk: &[Report]) -> Result<(), DeliveryError> {
        if !self.rate_limiter.is_allowed() {
            tracing::debug!(reports = chunk.len(), "Transport rate limit reached");
            return Err(DeliveryError::RateLimited);
        }
        self.deliver(chunk).await
    }

    async fn on_flush_failed(&self, unsent: Vec<Report>, error: &DeliveryError) {
        self.salvage(unsent, &error.to_string()).await;
    }
}

/// Builder for [`ErrorReporter`], mainly to swap collaborators in tests.
pub struct ReporterBuilder {
    config: PipelineConfig,
    transport: Option<Arc<dyn Transport>>,
    sanitizer: Arc<dyn Sanitizer>,
    sink: Arc<dyn EventSink>,
    calendar: Arc<dyn Calendar>,
}

impl ReporterBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn calendar(mut self, calendar: Arc<dyn Calendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub async fn build(self) -> Result<ErrorReporter, ReporterError> {
        let config = self.config;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new(config.client.clone())
                    .map_err(|e| ReporterError::Transport(e.to_string()))?,
            ),
        };

        let metrics = MetricsCollector::new().map_err(|e| ReporterError::Metrics(e.to_string()))?;
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let quota = Arc::new(QuotaManager::with_calendar(
            config.quota.clone(),
            self.calendar,
        ));

        let queue = if config.offline_queue_enabled {
            let queue = OfflineQueue::open(config.queue.clone(), self.sink.clone()).await;
            metrics.set_queue_size(queue.size());
            Some(Arc::new(queue))
        } else {
            None
        };

        let compressor = config
            .compression_enabled
            .then(|| Compressor::new(config.compression_threshold));

        let deliverer = Arc::new(Deliverer {
            payloads: PayloadBuilder::new(compressor),
            transport: transport.clone(),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry: RetryManager::new(config.retry.clone()),
            quota: quota.clone(),
            queue: queue.clone(),
            sink: self.sink.clone(),
            metrics: metrics.clone(),
            health: health.clone(),
        });

        let batch = config
            .batching_enabled
            .then(|| BatchManager::new(config.batch.clone(), deliverer.clone()));

        tracing::info!(
            endpoint = transport.endpoint(),
            batching = config.batching_enabled,
            offline_queue = config.offline_queue_enabled,
            "Error reporter initialized"
        );

        Ok(ErrorReporter {
            inner: Arc::new(ReporterInner {
                config,
                quota,
                deliverer,
                batch,
                queue,
                transport,
                sanitizer: self.sanitizer,
                metrics,
                health,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

struct ReporterInner {
    config: PipelineConfig,
    quota: Arc<QuotaManager>,
    deliverer: Arc<Deliverer>,
    batch: Option<BatchManager>,
    queue: Option<Arc<OfflineQueue>>,
    transport: Arc<dyn Transport>,
    sanitizer: Arc<dyn Sanitizer>,
    metrics: MetricsCollector,
    health: Arc<HealthMonitor>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Entry point for the host application. Cheap to clone.
#[derive(Clone)]
pub struct ErrorReporter {
    inner: Arc<ReporterInner>,
}

impl ErrorReporter {
    pub async fn new(config: PipelineConfig) -> Result<Self, ReporterError> {
        Self::builder(config).build().await
    }

    pub fn builder(config: PipelineConfig) -> ReporterBuilder {
        ReporterBuilder {
            config,
            transport: None,
            sanitizer: Arc::new(KeyRedactor::default()),
            sink: Arc::new(TracingSink),
            calendar: Arc::new(LocalCalendar),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Fire-and-forget capture. Outside a tokio runtime the report is dropped
    /// with a warning.
    pub fn report(&self, report: Report) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let reporter = self.clone();
                handle.spawn(async move {
                    reporter.capture(report).await;
                });
            }
            Err(_) => {
                tracing::warn!(report_id = %report.id, "No tokio runtime, error report dropped");
            }
        }
    }

    /// Runs a report through the pipeline and says where it ended up.
    pub async fn capture(&self, report: Report) -> DeliveryOutcome {
        let inner = &self.inner;
        let report = inner.sanitizer.sanitize(report);

        if let Err(rejection) = inner.quota.can_send(report.serialized_size()) {
            tracing::debug!(report_id = %report.id, reason = %rejection, "Report not admitted");
            inner.metrics.record_reports(ReportOutcome::Rejected, 1);
            return inner
                .deliverer
                .salvage(vec![report], &rejection.to_string())
                .await;
        }

        match &inner.batch {
            Some(batch) => match batch.add(report).await {
                Ok(BatchOutcome::Buffered) => DeliveryOutcome::Buffered,
                Ok(BatchOutcome::Flushed { .. }) => DeliveryOutcome::Sent,
                // The batch already handed the reports to `on_flush_failed`.
                Err(error) => self.salvaged_outcome(&error),
            },
            None => match inner.deliverer.send_chunk(std::slice::from_ref(&report)).await {
                Ok(()) => DeliveryOutcome::Sent,
                Err(error) => {
                    inner
                        .deliverer
                        .salvage(vec![report], &error.to_string())
                        .await
                }
            },
        }
    }

    /// Sends the pending batch now. Returns how many reports went out.
    pub async fn flush(&self) -> Result<usize, DeliveryError> {
        match &self.inner.batch {
            Some(batch) => batch.flush().await,
            None => Ok(0),
        }
    }

    /// Replays queued reports through breaker and retry only. Quota and the
    /// rate window are not consulted; failures count against the entry's
    /// attempts instead of being re-enqueued.
    pub async fn process_queue(&self) -> DrainSummary {
        let inner = &self.inner;
        let Some(queue) = &inner.queue else {
            return DrainSummary::default();
        };

        let deliverer = &inner.deliverer;
        let summary = queue
            .process_queue(move |report| async move {
                deliverer.deliver(std::slice::from_ref(&report)).await
            })
            .await;

        inner.metrics.record_reports(ReportOutcome::Dropped, summary.dropped);
        inner.metrics.set_queue_size(queue.size());
        self.update_queue_health();
        summary
    }

    /// Spawns the queue replay timer, the quota midnight reset and endpoint
    /// health checks. Calling it again is a no-op.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut tasks = Vec::new();
        if inner.queue.is_some() {
            tasks.push(self.spawn_queue_processor());
        }
        tasks.push(inner.quota.spawn_midnight_reset(inner.cancel.clone()));
        tasks.push(
            inner
                .health
                .spawn_periodic_checks(inner.transport.clone(), inner.cancel.clone()),
        );

        inner.tasks.lock().extend(tasks);
        tracing::info!("Error reporter background tasks started");
    }

    /// Stops timers, flushes the batch and runs one last queue drain.
    /// Best-effort: failures are routed like any other delivery failure.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();

        if let Some(batch) = &inner.batch
            && let Err(e) = batch.shutdown().await
        {
            tracing::warn!(error = %e, "Final batch flush failed");
        }

        if inner.queue.is_some() {
            let summary = self.process_queue().await;
            tracing::info!(
                delivered = summary.delivered,
                remaining = self.queue_size(),
                "Final offline queue drain"
            );
        }

        let tasks: Vec<JoinHandle<()>> = inner.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        // Aborted tasks resolve to a cancelled JoinError.
        future::join_all(tasks).await;
        tracing::info!("Error reporter shut down");
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.as_ref().map_or(0, |queue| queue.size())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.batch.as_ref().map_or(0, BatchManager::pending_count)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn metrics_collector(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    pub fn health_report(&self) -> HealthReport {
        self.update_queue_health();
        self.inner.health.report()
    }

    pub fn quota_usage(&self) -> QuotaUsage {
        self.inner.quota.usage()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.deliverer.breaker.state()
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.inner.deliverer.retry.stats()
    }

    fn salvaged_outcome(&self, error: &DeliveryError) -> DeliveryOutcome {
        let reason = error.to_string();
        if self.inner.queue.is_some() {
            DeliveryOutcome::Queued { reason }
        } else {
            DeliveryOutcome::Dropped { reason }
        }
    }

    fn update_queue_health(&self) {
        let Some(queue) = &self.inner.queue else {
            return;
        };
        let size = queue.size();
        let max = queue.config().max_queue_size;
        let health = if max > 0 && size * 10 >= max * 9 {
            ComponentHealth::Degraded(format!("offline queue at {size}/{max}"))
        } else {
            ComponentHealth::Healthy
        };
        self.inner.health.update_component_health(QUEUE_COMPONENT, health);
    }

    fn spawn_queue_processor(&self) -> JoinHandle<()> {
        let weak: Weak<ReporterInner> = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self.inner.config.queue.process_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let reporter = ErrorReporter { inner };
                        if reporter.queue_size() > 0 {
                            reporter.process_queue().await;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::MockSanitizer;
    use crate::sender::{Payload, TransmissionResult, TransportError};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTransport {
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: &Payload) -> Result<TransmissionResult, TransportError> {
            self.bodies
                .lock()
                .push(String::from_utf8_lossy(payload.body()).into_owned());
            Ok(TransmissionResult {
                status_code: 202,
                latency: Duration::ZERO,
                bytes_sent: payload.len(),
                report_count: payload.report_count(),
                compressed: payload.is_compressed(),
            })
        }

        async fn health_check(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn endpoint(&self) -> &str {
            "memory://collector"
        }
    }

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            batching_enabled: false,
            queue: QueueConfig {
                path: dir.path().join("queue.json"),
                ..QueueConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn sanitizer_output_is_what_gets_sent() {
        let dir = TempDir::new().unwrap();
        let mut sanitizer = MockSanitizer::new();
        sanitizer.expect_sanitize().times(1).returning(|mut report| {
            report.message = "scrubbed".to_string();
            report
        });

        let transport = Arc::new(RecordingTransport::default());
        let reporter = ErrorReporter::builder(config(&dir))
            .transport(transport.clone())
            .sanitizer(Arc::new(sanitizer))
            .build()
            .await
            .unwrap();

        let outcome = reporter.capture(Report::builder("raw secret").build()).await;
        assert_eq!(outcome, DeliveryOutcome::Sent);

        let bodies = transport.bodies.lock();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("scrubbed"));
        assert!(!bodies[0].contains("raw secret"));
    }

    #[tokio::test]
    async fn quota_rejection_skips_transport() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.quota.max_payload_size = 16;

        let transport = Arc::new(RecordingTransport::default());
        let reporter = ErrorReporter::builder(config)
            .transport(transport.clone())
            .build()
            .await
            .unwrap();

        let outcome = reporter.capture(Report::builder("far too large").build()).await;
        assert!(matches!(outcome, DeliveryOutcome::Queued { .. }));
        assert!(transport.bodies.lock().is_empty());
        assert_eq!(reporter.metrics().reports_rejected, 1);
        assert_eq!(reporter.queue_size(), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let reporter = ErrorReporter::builder(config(&dir))
            .transport(Arc::new(RecordingTransport::default()))
            .build()
            .await
            .unwrap();

        reporter.start();
        reporter.start();
        assert_eq!(reporter.inner.tasks.lock().len(), 3);

        reporter.destroy().await;
        assert!(reporter.inner.tasks.lock().is_empty());
    }
}
