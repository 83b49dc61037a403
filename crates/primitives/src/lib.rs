//! Core primitives for the portalsink project.
/// Block identity and header types
pub mod blocks;
/// Row-set types produced by mapping functions
pub mod rows;
/// Per-table buffering thresholds
pub mod tables;

pub use blocks::{Block, BlockHeader, BlockRef, DataBatch};
pub use rows::{RowSet, TableRow};
pub use tables::{TableOptions, BLOCKS_TABLE};
