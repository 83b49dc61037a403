//! Row types flowing from mapping functions into the block writer.

use std::collections::BTreeMap;

/// One row destined for an item table: column name to JSON cell value.
pub type TableRow = serde_json::Map<String, serde_json::Value>;

/// Per-block mapping output: item-table name to the rows this block emits
/// into it. Tables absent from the map emit no rows for the block.
pub type RowSet = BTreeMap<String, Vec<TableRow>>;
