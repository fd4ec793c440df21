use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("IO error during compression: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decompressed payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Envelope is not marked as compressed")]
    NotCompressed,
}

/// Wire envelope for a gzip-compressed body: `{"compressed":true,"data":"<base64>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedEnvelope {
    pub compressed: bool,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompressedBody {
    Plain(String),
    Envelope(CompressedEnvelope),
}

#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: usize,
}

impl Compressor {
    /// Inputs at or below `threshold` bytes are passed through untouched.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn compress(&self, input: &str) -> Result<CompressedBody, CompressionError> {
        if input.len() <= self.threshold {
            return Ok(CompressedBody::Plain(input.to_string()));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(input.as_bytes())?;
        let gzipped = encoder.finish()?;
        let data = STANDARD.encode(gzipped);

        // Incompressible input would only grow behind the envelope.
        if data.len() >= input.len() {
            return Ok(CompressedBody::Plain(input.to_string()));
        }

        Ok(CompressedBody::Envelope(CompressedEnvelope {
            compressed: true,
            data,
        }))
    }

    pub fn decompress(&self, body: &CompressedBody) -> Result<String, CompressionError> {
        match body {
            CompressedBody::Plain(text) => Ok(text.clone()),
            CompressedBody::Envelope(envelope) => decode_envelope(envelope),
        }
    }
}

pub fn decode_envelope(envelope: &CompressedEnvelope) -> Result<String, CompressionError> {
    if !envelope.compressed {
        return Err(CompressionError::NotCompressed);
    }

    let gzipped = STANDARD.decode(&envelope.data)?;
    let mut decoder = GzDecoder::new(gzipped.as_slice());
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_round_trips_uncompressed() {
        let compressor = Compressor::new(1024);
        let input = "short message with ユニコード";

        let body = compressor.compress(input).unwrap();
        assert!(matches!(body, CompressedBody::Plain(_)));
        assert_eq!(compressor.decompress(&body).unwrap(), input);
    }

    #[test]
    fn long_input_round_trips_compressed() {
        let compressor = Compressor::new(1024);
        let input = "TypeError: cannot read property 'id' of undefined — スタック\n".repeat(200);

        let body = compressor.compress(&input).unwrap();
        let CompressedBody::Envelope(envelope) = &body else {
            panic!("expected a compressed envelope");
        };
        assert!(envelope.compressed);
        assert!(envelope.data.len() < input.len());
        assert_eq!(compressor.decompress(&body).unwrap(), input);
    }

    #[test]
    fn envelope_serializes_to_wire_shape() {
        let compressor = Compressor::new(0);
        let CompressedBody::Envelope(envelope) = compressor.compress(&"a".repeat(4096)).unwrap()
        else {
            panic!("expected a compressed envelope");
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["compressed"], true);
        assert!(json["data"].is_string());
    }

    #[test]
    fn rejects_uncompressed_envelope() {
        let envelope = CompressedEnvelope {
            compressed: false,
            data: String::new(),
        };
        assert!(matches!(
            decode_envelope(&envelope),
            Err(CompressionError::NotCompressed)
        ));
    }
}
