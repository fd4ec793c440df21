use crate::domain::Report;
use crate::pipeline::sink::{EventSink, PipelineWarning};
use crate::sender::DeliveryError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub path: PathBuf,
    pub max_queue_size: usize,
    pub max_retries: u32,
    pub max_age: Duration,
    pub process_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/rask-error-forwarder/offline-queue.json"),
            max_queue_size: 1000,
            max_retries: 5,
            max_age: Duration::from_secs(24 * 3600), // 24 hours
            process_interval: Duration::from_secs(30),
        }
    }
}

/// One queued report as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry key, distinct from `data.id`: the same report may be queued twice.
    pub id: String,
    pub data: Report,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Another drain was already running.
    pub skipped: bool,
}

/// Durable fallback for reports that could not be sent.
///
/// The in-memory deque is authoritative. The file at `config.path` is a JSON
/// snapshot rewritten after each mutation.
pub struct OfflineQueue {
    config: QueueConfig,
    entries: Mutex<VecDeque<QueueEntry>>,
    processing: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
    sink: Arc<dyn EventSink>,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    /// Loads the snapshot at `config.path`. Never fails: a missing file is an
    /// empty queue and an unreadable one is reported and treated as empty.
    pub async fn open(config: QueueConfig, sink: Arc<dyn EventSink>) -> Self {
        let loaded = match load_entries(&config.path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = ?config.path, error = %e, "Offline queue file unreadable");
                sink.notify_warning(&PipelineWarning::QueueLoadFailed {
                    path: config.path.clone(),
                    message: e.to_string(),
                });
                Vec::new()
            }
        };

        let total = loaded.len();
        let cutoff = now_millis() - config.max_age.as_millis() as i64;
        let mut entries: VecDeque<QueueEntry> = loaded
            .into_iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .collect();
        while entries.len() > config.max_queue_size {
            entries.pop_front();
        }
        let pruned = total - entries.len();

        tracing::info!(
            path = ?config.path,
            entries = entries.len(),
            pruned,
            "Offline queue loaded"
        );

        let queue = Self {
            config,
            entries: Mutex::new(entries),
            processing: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
            sink,
        };
        if pruned > 0 {
            queue.persist().await;
        }
        queue
    }

    pub async fn enqueue(&self, report: Report) {
        self.enqueue_all(vec![report]).await;
    }

    pub async fn enqueue_all(&self, reports: Vec<Report>) {
        if reports.is_empty() {
            return;
        }

        let now = now_millis();
        let evicted: Vec<QueueEntry> = {
            let mut entries = self.entries.lock();
            for report in reports {
                entries.push_back(QueueEntry {
                    id: Uuid::new_v4().to_string(),
                    data: report,
                    timestamp: now,
                    attempts: 0,
                });
            }
            let overflow = entries.len().saturating_sub(self.config.max_queue_size);
            entries.drain(..overflow).collect()
        };

        for entry in &evicted {
            tracing::warn!(report_id = %entry.data.id, "Offline queue full, evicting oldest report");
            self.sink.notify_warning(&PipelineWarning::QueueEvicted {
                report_id: entry.data.id.clone(),
            });
        }

        self.persist().await;
    }

    /// Replays every entry present when the drain starts, once each.
    ///
    /// Delivered entries are removed. Failed ones have `attempts` bumped and
    /// are dropped once it reaches `max_retries`. A call made while another
    /// drain is running returns a skipped summary immediately.
    pub async fn process_queue<F, Fut>(&self, mut send: F) -> DrainSummary
    where
        F: FnMut(Report) -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Offline queue drain already in progress");
            return DrainSummary {
                skipped: true,
                ..DrainSummary::default()
            };
        }
        let _guard = ProcessingGuard(&self.processing);

        // Keyed by entry id so duplicate reports keep separate attempt counts.
        let snapshot: Vec<(String, Report)> = self
            .entries
            .lock()
            .iter()
            .map(|entry| (entry.id.clone(), entry.data.clone()))
            .collect();

        let mut summary = DrainSummary::default();
        if snapshot.is_empty() {
            return summary;
        }

        for (entry_id, report) in snapshot {
            summary.attempted += 1;
            let report_id = report.id.clone();
            let result = send(report).await;

            let exhausted = {
                let mut entries = self.entries.lock();
                let Some(pos) = entries.iter().position(|entry| entry.id == entry_id) else {
                    // Evicted while the send was in flight.
                    if result.is_ok() {
                        summary.delivered += 1;
                    }
                    continue;
                };
                match &result {
                    Ok(()) => {
                        entries.remove(pos);
                        summary.delivered += 1;
                        None
                    }
                    Err(_) => {
                        let entry = &mut entries[pos];
                        entry.attempts += 1;
                        if entry.attempts >= self.config.max_retries {
                            let attempts = entry.attempts;
                            entries.remove(pos);
                            summary.dropped += 1;
                            Some(attempts)
                        } else {
                            summary.failed += 1;
                            None
                        }
                    }
                }
            };

            if let Err(e) = &result {
                tracing::debug!(report_id = %report_id, error = %e, "Queued report replay failed");
            }
            if let Some(attempts) = exhausted {
                tracing::warn!(report_id = %report_id, attempts, "Dropping queued report after max retries");
                self.sink.notify_warning(&PipelineWarning::ReplayExhausted {
                    report_id,
                    attempts,
                });
            }
        }

        self.persist().await;

        tracing::info!(
            delivered = summary.delivered,
            failed = summary.failed,
            dropped = summary.dropped,
            remaining = self.size(),
            "Offline queue drain finished"
        );
        summary
    }

    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Rewrites the snapshot. Failures go to the sink and are otherwise ignored.
    pub async fn persist(&self) {
        let _write = self.persist_lock.lock().await;
        let snapshot: Vec<QueueEntry> = self.entries.lock().iter().cloned().collect();

        if let Err(e) = write_entries(&self.config.path, &snapshot).await {
            tracing::warn!(path = ?self.config.path, error = %e, "Failed to persist offline queue");
            self.sink.notify_warning(&PipelineWarning::QueuePersistFailed {
                path: self.config.path.clone(),
                message: e.to_string(),
            });
        }
    }
}

async fn load_entries(path: &Path) -> Result<Vec<QueueEntry>, QueueError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

async fn write_entries(path: &Path, entries: &[QueueEntry]) -> Result<(), QueueError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let data = serde_json::to_vec(entries)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, &data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sink::{ChannelSink, PipelineEvent};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> QueueConfig {
        QueueConfig {
            path: dir.path().join("queue.json"),
            max_queue_size: 5,
            max_retries: 2,
            ..QueueConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty_queue() {
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = ChannelSink::new();
        let queue = OfflineQueue::open(config(&dir), Arc::new(sink)).await;

        assert_eq!(queue.size(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn persist_failure_is_reported_but_queue_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let (sink, mut rx) = ChannelSink::new();
        let queue = OfflineQueue::open(
            QueueConfig {
                path: blocker.join("queue.json"),
                ..config(&dir)
            },
            Arc::new(sink),
        )
        .await;

        queue.enqueue(Report::builder("kept").build()).await;

        assert_eq!(queue.size(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(PipelineEvent::Warning(PipelineWarning::QueuePersistFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let (sink, _rx) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let queue = OfflineQueue::open(config(&dir), sink.clone()).await;
        queue.enqueue(Report::builder("first").build()).await;
        queue.enqueue(Report::builder("second").build()).await;
        drop(queue);

        let reopened = OfflineQueue::open(config(&dir), sink).await;
        let messages: Vec<String> = reopened
            .entries()
            .into_iter()
            .map(|entry| entry.data.message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn duplicate_report_entries_count_attempts_separately() {
        let dir = TempDir::new().unwrap();
        let queue = OfflineQueue::open(
            QueueConfig {
                max_retries: 5,
                ..config(&dir)
            },
            Arc::new(crate::pipeline::sink::TracingSink),
        )
        .await;
        let report = Report::builder("sent twice").build();
        queue.enqueue(report.clone()).await;
        queue.enqueue(report.clone()).await;

        let summary = queue
            .process_queue(|_| async { Err(DeliveryError::CircuitOpen) })
            .await;

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.failed, 2);
        let entries = queue.entries();
        let attempts: Vec<u32> = entries.iter().map(|entry| entry.attempts).collect();
        assert_eq!(attempts, vec![1, 1]);
        assert!(entries.iter().all(|entry| entry.data.id == report.id));
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[tokio::test]
    async fn delivery_counted_when_entry_evicted_mid_send() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(
            OfflineQueue::open(
                QueueConfig {
                    max_queue_size: 1,
                    ..config(&dir)
                },
                Arc::new(crate::pipeline::sink::TracingSink),
            )
            .await,
        );
        queue.enqueue(Report::builder("in flight").build()).await;

        let evictor = queue.clone();
        let summary = queue
            .process_queue(move |_| {
                let evictor = evictor.clone();
                async move {
                    evictor.enqueue(Report::builder("newer").build()).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(summary.delivered, 1);
        let messages: Vec<String> = queue.entries().into_iter().map(|e| e.data.message).collect();
        assert_eq!(messages, vec!["newer"]);
    }
}
