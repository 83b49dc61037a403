//! Errors surfaced by the block writer.

use derive_more::{Display, Error};

/// Failure reported by the block writer at `push`, `drain`, or `flush`.
///
/// Flush failures are recorded inside the failing buffer and re-surface at
/// every subsequent await, so the variant carries the rendered store error
/// and stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum WriterError {
    /// A background flush failed. The buffer keeps its rows and the writer
    /// stays unhealthy; restart reconciliation cleans up after the process
    /// exits.
    #[display("flush of table '{table}' failed: {message}")]
    Flush {
        /// Table whose insert failed
        table: String,
        /// Rendered store error
        message: String,
    },
    /// The mapping function emitted rows for a table the target schema does
    /// not declare.
    #[display("mapping produced rows for unknown table '{table}'")]
    UnknownTable {
        /// The unknown table name
        table: String,
    },
}
