pub mod batch;

pub use batch::{BatchConfig, BatchManager, BatchOutcome, ChunkSender};
