use futures::future;
use rask_error_forwarder::Report;
use rask_error_forwarder::pipeline::{ChannelSink, EventSink, PipelineEvent, PipelineWarning, TracingSink};
use rask_error_forwarder::reliability::{OfflineQueue, QueueConfig, QueueEntry};
use rask_error_forwarder::sender::DeliveryError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn queue_config(dir: &TempDir) -> QueueConfig {
    QueueConfig {
        path: dir.path().join("offline-queue.json"),
        max_queue_size: 5,
        max_retries: 3,
        max_age: Duration::from_secs(3600),
        process_interval: Duration::from_secs(30),
    }
}

fn report(message: &str) -> Report {
    Report::builder(message).build()
}

fn warnings(events: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineWarning> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Warning(warning) = event {
            out.push(warning);
        }
    }
    out
}

#[tokio::test]
async fn test_full_queue_evicts_oldest() {
    let dir = TempDir::new().unwrap();
    let (sink, mut events) = ChannelSink::new();
    let queue = OfflineQueue::open(queue_config(&dir), Arc::new(sink)).await;

    let reports: Vec<Report> = (0..6).map(|i| report(&format!("report-{i}"))).collect();
    let oldest_id = reports[0].id.clone();
    for report in reports {
        queue.enqueue(report).await;
    }

    assert_eq!(queue.size(), 5);
    let messages: Vec<String> = queue.entries().into_iter().map(|e| e.data.message).collect();
    assert_eq!(
        messages,
        vec!["report-1", "report-2", "report-3", "report-4", "report-5"]
    );
    assert_eq!(
        warnings(&mut events),
        vec![PipelineWarning::QueueEvicted {
            report_id: oldest_id
        }]
    );
}

#[tokio::test]
async fn test_concurrent_drains_run_once() {
    let dir = TempDir::new().unwrap();
    let queue = OfflineQueue::open(queue_config(&dir), Arc::new(TracingSink)).await;
    queue.enqueue_all(vec![report("a"), report("b")]).await;

    let sends = AtomicUsize::new(0);
    let slow_send = |_report: Report| {
        sends.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), DeliveryError>(())
        }
    };

    let summaries = future::join_all((0..3).map(|_| queue.process_queue(slow_send))).await;

    let (ran, skipped): (Vec<_>, Vec<_>) = summaries.into_iter().partition(|s| !s.skipped);
    assert_eq!(ran.len(), 1);
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().all(|s| s.attempted == 0));
    assert_eq!(ran[0].delivered, 2);
    assert_eq!(sends.load(Ordering::SeqCst), 2);
    assert_eq!(queue.size(), 0);
    assert!(!queue.is_processing());
}

#[tokio::test]
async fn test_failed_replays_drop_after_max_retries() {
    let dir = TempDir::new().unwrap();
    let (sink, mut events) = ChannelSink::new();
    let queue = OfflineQueue::open(queue_config(&dir), Arc::new(sink)).await;
    let doomed = report("never delivered");
    let doomed_id = doomed.id.clone();
    queue.enqueue(doomed).await;

    for round in 1..=2 {
        let summary = queue
            .process_queue(|_| async { Err(DeliveryError::CircuitOpen) })
            .await;
        assert_eq!(summary.failed, 1, "round {round}");
        assert_eq!(queue.entries()[0].attempts, round);
    }

    let summary = queue
        .process_queue(|_| async { Err(DeliveryError::CircuitOpen) })
        .await;
    assert_eq!(summary.dropped, 1);
    assert_eq!(queue.size(), 0);
    assert_eq!(
        warnings(&mut events),
        vec![PipelineWarning::ReplayExhausted {
            report_id: doomed_id,
            attempts: 3
        }]
    );
}

#[tokio::test]
async fn test_corrupt_file_starts_empty_with_warning() {
    let dir = TempDir::new().unwrap();
    let config = queue_config(&dir);
    std::fs::write(&config.path, "{ this is not a queue").unwrap();

    let (sink, mut events) = ChannelSink::new();
    let queue = OfflineQueue::open(config.clone(), Arc::new(sink)).await;

    assert_eq!(queue.size(), 0);
    match warnings(&mut events).as_slice() {
        [PipelineWarning::QueueLoadFailed { path, .. }] => assert_eq!(path, &config.path),
        other => panic!("expected one load warning, got {other:?}"),
    }

    // The queue stays usable and overwrites the bad snapshot.
    queue.enqueue(report("after corruption")).await;
    let reopened = OfflineQueue::open(config, Arc::new(TracingSink)).await;
    assert_eq!(reopened.size(), 1);
}

#[tokio::test]
async fn test_stale_entries_pruned_on_open() {
    let dir = TempDir::new().unwrap();
    let config = queue_config(&dir);
    let now = chrono::Utc::now().timestamp_millis();

    let fresh = report("fresh");
    let stale = report("stale");
    let entries = vec![
        QueueEntry {
            id: stale.id.clone(),
            data: stale,
            timestamp: now - 2 * 3600 * 1000,
            attempts: 1,
        },
        QueueEntry {
            id: fresh.id.clone(),
            data: fresh,
            timestamp: now,
            attempts: 0,
        },
    ];
    std::fs::write(&config.path, serde_json::to_vec(&entries).unwrap()).unwrap();

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let queue = OfflineQueue::open(config.clone(), sink).await;
    assert_eq!(queue.size(), 1);
    assert_eq!(queue.entries()[0].data.message, "fresh");

    let on_disk: Vec<QueueEntry> =
        serde_json::from_str(&std::fs::read_to_string(&config.path).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 1);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = queue_config(&dir);

    {
        let queue = OfflineQueue::open(config.clone(), Arc::new(TracingSink)).await;
        queue.enqueue_all(vec![report("one"), report("two")]).await;
        queue
            .process_queue(|report| async move {
                if report.message == "one" {
                    Ok(())
                } else {
                    Err(DeliveryError::RateLimited)
                }
            })
            .await;
    }

    let queue = OfflineQueue::open(config, Arc::new(TracingSink)).await;
    let entries = queue.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data.message, "two");
    assert_eq!(entries[0].attempts, 1);
}
