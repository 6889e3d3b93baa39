//! Batched persistence writer used by the event consumer, the synchronous
//! API and bulk import.

pub mod batch_writer;
pub mod retry;

pub use batch_writer::{
    BatchWriter, ChunkFailure, Record, WriteError, WriteReport, WriteSummary, marshal,
};
pub use retry::RetryConfig;
