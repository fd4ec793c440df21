use crate::domain::Report;
use crate::sender::{DeliveryError, split_into_chunks};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_payload_size: usize,
    pub chunk_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_timeout: Duration::from_secs(5),
            max_payload_size: 1024 * 1024, // 1MB
            chunk_delay: Duration::from_millis(100),
        }
    }
}

/// Downstream of the batch: delivers one chunk, and takes back whatever a
/// failed flush could not send.
#[async_trait]
pub trait ChunkSender: Send + Sync {
    async fn send_chunk(&self, chunk: &[Report]) -> Result<(), DeliveryError>;

    async fn on_flush_failed(&self, unsent: Vec<Report>, error: &DeliveryError) {
        tracing::error!(
            reports = unsent.len(),
            error = %error,
            "Batch flush failed, reports discarded"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Held in the current batch until a size or time trigger.
    Buffered,
    /// This call triggered a flush that delivered `reports` reports.
    Flushed { reports: usize },
}

#[derive(Default)]
struct BatchState {
    current: Vec<Report>,
    timer: Option<AbortHandle>,
    generation: u64,
    closed: bool,
}

impl BatchState {
    /// Empties the batch and disarms the timer in one step.
    fn take(&mut self) -> Vec<Report> {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut self.current)
    }
}

struct BatchInner {
    config: BatchConfig,
    sender: Arc<dyn ChunkSender>,
    state: Mutex<BatchState>,
}

/// Collects reports and flushes them on size or timeout. Never retries.
#[derive(Clone)]
pub struct BatchManager {
    inner: Arc<BatchInner>,
}

impl BatchManager {
    pub fn new(config: BatchConfig, sender: Arc<dyn ChunkSender>) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                config,
                sender,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub async fn add(&self, report: Report) -> Result<BatchOutcome, DeliveryError> {
        let ready = {
            let mut state = self.inner.state.lock();
            state.current.push(report);

            if state.closed || state.current.len() >= self.inner.config.batch_size {
                Some(state.take())
            } else {
                if state.timer.is_none() {
                    state.timer = Some(self.arm_timer(state.generation));
                }
                None
            }
        };

        match ready {
            Some(batch) => {
                let reports = batch.len();
                self.send_batch(batch).await?;
                Ok(BatchOutcome::Flushed { reports })
            }
            None => Ok(BatchOutcome::Buffered),
        }
    }

    /// Sends whatever is pending now. Returns the number of reports delivered.
    pub async fn flush(&self) -> Result<usize, DeliveryError> {
        let batch = self.inner.state.lock().take();
        let reports = batch.len();
        self.send_batch(batch).await?;
        Ok(reports)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().current.len()
    }

    /// Cancels the timer and flushes. Later reports are sent unbatched.
    pub async fn shutdown(&self) -> Result<usize, DeliveryError> {
        self.inner.state.lock().closed = true;
        self.flush().await
    }

    fn arm_timer(&self, generation: u64) -> AbortHandle {
        let manager = self.clone();
        let timeout = self.inner.config.batch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            manager.flush_expired(generation).await;
        })
        .abort_handle()
    }

    async fn flush_expired(&self, generation: u64) {
        let batch = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            // The timer is this task; drop the handle instead of aborting it.
            state.timer = None;
            state.generation += 1;
            std::mem::take(&mut state.current)
        };

        tracing::debug!(reports = batch.len(), "Batch timeout reached");
        if let Err(error) = self.send_batch(batch).await {
            // Unsent reports already went to `on_flush_failed`.
            tracing::debug!(error = %error, "Timed batch flush failed");
        }
    }

    async fn send_batch(&self, batch: Vec<Report>) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let config = &self.inner.config;
        let mut chunks = split_into_chunks(batch, config.max_payload_size).into_iter();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            if !first {
                tokio::time::sleep(config.chunk_delay).await;
            }
            first = false;

            if let Err(error) = self.inner.sender.send_chunk(&chunk).await {
                let mut unsent = chunk;
                unsent.extend(chunks.flatten());
                tracing::warn!(
                    unsent = unsent.len(),
                    error = %error,
                    "Batch flush stopped on failed chunk"
                );
                self.inner.sender.on_flush_failed(unsent, &error).await;
                return Err(error);
            }
        }

        Ok(())
    }
}
