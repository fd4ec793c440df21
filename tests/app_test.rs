use async_trait::async_trait;
use parking_lot::Mutex;
use rask_error_forwarder::app::{App, Config, RunSummary};
use rask_error_forwarder::sender::{Payload, TransmissionResult, Transport, TransportError};
use rask_error_forwarder::{ErrorReporter, Report};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::BufReader;

#[derive(Default)]
struct CollectingTransport {
    reports: Mutex<Vec<Report>>,
}

#[async_trait]
impl Transport for CollectingTransport {
    async fn send(&self, payload: &Payload) -> Result<TransmissionResult, TransportError> {
        let body: serde_json::Value = serde_json::from_slice(payload.body()).unwrap();
        let reports: Vec<Report> = match body.get("errors") {
            Some(errors) => serde_json::from_value(errors.clone()).unwrap(),
            None => vec![serde_json::from_value(body).unwrap()],
        };
        self.reports.lock().extend(reports);

        Ok(TransmissionResult {
            status_code: 200,
            latency: Duration::ZERO,
            bytes_sent: payload.len(),
            report_count: payload.report_count(),
            compressed: false,
        })
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "memory://collector"
    }
}

async fn app_with(config: Config, transport: Arc<CollectingTransport>) -> App {
    let reporter = ErrorReporter::builder(config.to_pipeline_config())
        .transport(transport)
        .build()
        .await
        .unwrap();
    App::with_reporter(config, reporter)
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        environment: Some("staging".to_string()),
        release: Some("1.4.2".to_string()),
        batch_size: 2,
        batch_timeout_ms: 60_000,
        chunk_delay_ms: 0,
        queue_path: dir.path().join("queue.json"),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_stdin_lines_forwarded_until_eof() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(CollectingTransport::default());
    let app = app_with(test_config(&dir), transport.clone()).await;

    let input = concat!(
        "{\"message\":\"first\"}\n",
        "\n",
        "not json\n",
        "{\"message\":\"second\",\"environment\":\"canary\"}\n",
        "{\"message\":\"third\",\"severity\":\"warning\"}\n",
    );
    let summary = app
        .run_with_input(BufReader::new(input.as_bytes()), std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            accepted: 3,
            invalid: 1
        }
    );

    // Two went out as a full batch and the third on shutdown.
    let reports = transport.reports.lock().clone();
    let messages: Vec<&str> = reports.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second", "third"]);
    assert_eq!(reports[0].environment.as_deref(), Some("staging"));
    assert_eq!(reports[1].environment.as_deref(), Some("canary"));
    assert!(reports.iter().all(|r| r.release.as_deref() == Some("1.4.2")));
}

#[tokio::test]
async fn test_shutdown_signal_stops_reading() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(CollectingTransport::default());
    let app = app_with(test_config(&dir), transport.clone()).await;

    let (_writer, reader) = tokio::io::duplex(64);
    let summary = app
        .run_with_input(BufReader::new(reader), async {})
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::default());
    assert!(transport.reports.lock().is_empty());
}
