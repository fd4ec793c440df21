use super::compression::{CompressedBody, CompressionError, Compressor};
use crate::domain::Report;
use serde::Serialize;
use thiserror::Error;

/// `{"type":"batch","errors":[]}` without any reports.
const BATCH_ENVELOPE_OVERHEAD: usize = 28;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Compression failed: {0}")]
    Compression(#[from] CompressionError),
    #[error("Payload is empty")]
    Empty,
}

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    errors: &'a [Report],
}

/// An encoded request body plus what it carries.
#[derive(Debug, Clone)]
pub struct Payload {
    body: Vec<u8>,
    report_count: usize,
    compressed: bool,
}

impl Payload {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn report_count(&self) -> usize {
        self.report_count
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }
}

#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    compressor: Option<Compressor>,
}

impl PayloadBuilder {
    pub fn new(compressor: Option<Compressor>) -> Self {
        Self { compressor }
    }

    /// Encodes one report as-is and several as a batch envelope, then
    /// compresses the body when it is above the compressor's threshold.
    pub fn build(&self, reports: &[Report]) -> Result<Payload, SerializationError> {
        let json = match reports {
            [] => return Err(SerializationError::Empty),
            [single] => serde_json::to_string(single)?,
            many => serde_json::to_string(&BatchEnvelope {
                kind: "batch",
                errors: many,
            })?,
        };

        let (body, compressed) = match &self.compressor {
            Some(compressor) => match compressor.compress(&json)? {
                CompressedBody::Plain(text) => (text.into_bytes(), false),
                CompressedBody::Envelope(envelope) => (serde_json::to_vec(&envelope)?, true),
            },
            None => (json.into_bytes(), false),
        };

        Ok(Payload {
            body,
            report_count: reports.len(),
            compressed,
        })
    }
}

/// Uncompressed size of the batch envelope holding `reports`.
pub fn batch_encoded_size(reports: &[Report]) -> usize {
    let items: usize = reports.iter().map(Report::serialized_size).sum();
    BATCH_ENVELOPE_OVERHEAD + items + reports.len().saturating_sub(1)
}

/// Greedily packs reports, in insertion order, into contiguous chunks whose
/// batch envelope stays within `max_payload_size`.
///
/// A report that is too large on its own still gets a chunk of its own.
pub fn split_into_chunks(reports: Vec<Report>, max_payload_size: usize) -> Vec<Vec<Report>> {
    let mut chunks = Vec::new();
    let mut current: Vec<Report> = Vec::new();
    let mut current_size = BATCH_ENVELOPE_OVERHEAD;

    for report in reports {
        let size = report.serialized_size();
        let separator = usize::from(!current.is_empty());

        if !current.is_empty() && current_size + separator + size > max_payload_size {
            chunks.push(std::mem::take(&mut current));
            current_size = BATCH_ENVELOPE_OVERHEAD;
        }

        current_size += usize::from(!current.is_empty()) + size;
        current.push(report);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::compression::{CompressedEnvelope, decode_envelope};
    use chrono::{TimeZone, Utc};

    fn report(message: &str) -> Report {
        Report::builder(message)
            .timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn single_report_is_sent_bare() {
        let builder = PayloadBuilder::default();
        let payload = builder.build(&[report("one")]).unwrap();

        let json: serde_json::Value = serde_json::from_slice(payload.body()).unwrap();
        assert_eq!(json["message"], "one");
        assert!(json.get("type").is_none());
        assert_eq!(payload.report_count(), 1);
    }

    #[test]
    fn multiple_reports_use_batch_envelope() {
        let builder = PayloadBuilder::default();
        let reports = vec![report("one"), report("two")];
        let payload = builder.build(&reports).unwrap();

        let json: serde_json::Value = serde_json::from_slice(payload.body()).unwrap();
        assert_eq!(json["type"], "batch");
        assert_eq!(json["errors"].as_array().unwrap().len(), 2);
        assert_eq!(payload.len(), batch_encoded_size(&reports));
    }

    #[test]
    fn large_bodies_are_compressed() {
        let builder = PayloadBuilder::new(Some(Compressor::new(256)));
        let reports: Vec<Report> = (0..20).map(|_| report(&"x".repeat(100))).collect();
        let payload = builder.build(&reports).unwrap();
        assert!(payload.is_compressed());

        let envelope: CompressedEnvelope = serde_json::from_slice(payload.body()).unwrap();
        let decoded: serde_json::Value =
            serde_json::from_str(&decode_envelope(&envelope).unwrap()).unwrap();
        assert_eq!(decoded["errors"].as_array().unwrap().len(), 20);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            PayloadBuilder::default().build(&[]),
            Err(SerializationError::Empty)
        ));
    }

    #[test]
    fn chunks_respect_limit_and_order() {
        let reports: Vec<Report> = (0..10).map(|i| report(&format!("report-{i}"))).collect();
        let single = reports[0].serialized_size();
        let limit = BATCH_ENVELOPE_OVERHEAD + 3 * single + 2;

        let chunks = split_into_chunks(reports.clone(), limit);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 3, 1]);
        for chunk in &chunks {
            assert!(batch_encoded_size(chunk) <= limit);
        }

        let flattened: Vec<Report> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, reports);
    }

    #[test]
    fn oversized_report_gets_its_own_chunk() {
        let reports = vec![report("a"), report(&"b".repeat(500)), report("c")];
        let chunks = split_into_chunks(reports, 300);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![1, 1, 1]);
    }
}
