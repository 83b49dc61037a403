//! ClickHouse access for portalsink.
//!
//! The adapter is deliberately thin: one operation that returns rows, one
//! that returns nothing, and one bulk insert in `JSONEachRow` format. Retry
//! policy belongs to callers.

/// Store trait and HTTP client
pub mod client;
/// Store and schema error types
pub mod error;
/// Target-database schema inspection
pub mod schema;

pub use client::{decode_rows, latest_block_ref, Store, StoreClient};
pub use error::{SchemaError, StoreError};
pub use schema::{inspect, BlocksTable, ItemTable, Schema};
