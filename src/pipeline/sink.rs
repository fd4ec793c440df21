use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Non-fatal conditions the host may want to know about.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    #[error("failed to persist offline queue to {path:?}: {message}")]
    QueuePersistFailed { path: PathBuf, message: String },
    #[error("offline queue file {path:?} unreadable, starting empty: {message}")]
    QueueLoadFailed { path: PathBuf, message: String },
    #[error("offline queue full, evicted report {report_id}")]
    QueueEvicted { report_id: String },
    #[error("report {report_id} dropped after {attempts} replay attempts")]
    ReplayExhausted { report_id: String, attempts: u32 },
}

/// Reports that could not be delivered and have nowhere else to go.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} report(s) undeliverable: {message}", report_ids.len())]
pub struct DeliveryFailure {
    pub report_ids: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Warning(PipelineWarning),
    Error(DeliveryFailure),
}

pub trait EventSink: Send + Sync {
    fn notify_warning(&self, warning: &PipelineWarning);

    fn notify_error(&self, failure: &DeliveryFailure);
}

/// Default sink, writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify_warning(&self, warning: &PipelineWarning) {
        tracing::warn!(%warning, "Error pipeline warning");
    }

    fn notify_error(&self, failure: &DeliveryFailure) {
        tracing::error!(
            reports = failure.report_ids.len(),
            message = %failure.message,
            "Error reports lost"
        );
    }
}

/// Forwards events over an unbounded channel. Send errors after the
/// receiver is gone are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify_warning(&self, warning: &PipelineWarning) {
        let _ = self.tx.send(PipelineEvent::Warning(warning.clone()));
    }

    fn notify_error(&self, failure: &DeliveryFailure) {
        let _ = self.tx.send(PipelineEvent::Error(failure.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify_warning(&PipelineWarning::QueueEvicted {
            report_id: "a".to_string(),
        });
        sink.notify_error(&DeliveryFailure {
            report_ids: vec!["b".to_string()],
            message: "boom".to_string(),
        });

        assert!(matches!(
            rx.try_recv(),
            Ok(PipelineEvent::Warning(PipelineWarning::QueueEvicted { .. }))
        ));
        match rx.try_recv() {
            Ok(PipelineEvent::Error(failure)) => {
                assert_eq!(failure.to_string(), "1 report(s) undeliverable: boom");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.notify_warning(&PipelineWarning::QueueEvicted {
            report_id: "a".to_string(),
        });
    }
}
