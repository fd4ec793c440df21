pub mod client;
pub mod compression;
pub mod serialization;
pub mod transmission;

pub use client::{
    ClientConfig, ConnectionStats, HttpTransport, NetworkErrorKind, Transport, TransportError,
};
pub use compression::{CompressedBody, CompressedEnvelope, CompressionError, Compressor};
pub use serialization::{
    Payload, PayloadBuilder, SerializationError, batch_encoded_size, split_into_chunks,
};
pub use transmission::{DeliveryError, TransmissionResult};
