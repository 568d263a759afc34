//! Sample handling.

pub mod storage;

#[cfg(feature = "storage_csv")]
pub use storage::CsvSink;
pub use storage::{MemorySink, SampleSink};
