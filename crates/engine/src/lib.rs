//! The portalsink processing engine: the block writer, the reconciler, and
//! the loop that drives a data source into the store.

/// Writer error types
pub mod error;
/// Rolling throughput metrics
pub mod metrics;
/// The processing loop
pub mod processor;
/// Restart/reorg reconciliation
pub mod reconcile;
/// Per-table buffered insert engine
pub mod writer;

pub use error::WriterError;
pub use metrics::Progress;
pub use processor::{run, BlockMap, ProcessorArgs};
pub use reconcile::reconcile;
pub use writer::BlockWriter;
