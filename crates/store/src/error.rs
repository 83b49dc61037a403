//! Error types surfaced by the store adapter and schema inspector.

use derive_more::{Display, Error};

/// Failure of a single store operation. The adapter performs no retries;
/// whether an error is worth retrying is the caller's concern.
#[derive(Debug, Display, Error)]
pub enum StoreError {
    /// The request never produced an HTTP response.
    #[display("store request failed: {source}")]
    Transport {
        /// Underlying transport error
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[display("store returned status {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Server error message body
        message: String,
    },
    /// A response row could not be decoded.
    #[display("bad store response row: {source}")]
    Decode {
        /// Underlying JSON error
        source: serde_json::Error,
    },
}

/// The target database does not satisfy the framework's schema contract.
/// Always fatal at startup; the framework validates the schema but does not
/// own or migrate it.
#[derive(Debug, Display, Error)]
pub enum SchemaError {
    /// The reserved head-cursor table is absent.
    #[display("'blocks' table is not defined")]
    MissingBlocksTable,
    /// A required framework column is absent.
    #[display("table '{table}' is missing required column '{column}'")]
    MissingColumn {
        /// Offending table
        table: String,
        /// Missing column
        column: String,
    },
    /// A framework column exists with an unsupported type.
    #[display("table '{table}' column '{column}' has type {found}, expected {expected}")]
    ColumnType {
        /// Offending table
        table: String,
        /// Offending column
        column: String,
        /// Type found in the target database
        found: String,
        /// Types the contract accepts
        expected: &'static str,
    },
    /// The inspection query itself failed.
    #[display("schema inspection failed: {source}")]
    Store {
        /// Underlying store error
        source: StoreError,
    },
}
