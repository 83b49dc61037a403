//! Target-database schema inspection.
//!
//! The framework does not own the schema: operators create the tables and
//! pick column widths. Inspection verifies the contract up front so bad
//! widths fail loudly at startup instead of truncating silently at insert
//! time.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;

use primitives::BLOCKS_TABLE;

use crate::{
    client::{decode_rows, Store},
    error::SchemaError,
};

/// Accepted types for block-number columns.
const BLOCK_NUMBER_TYPES: &str = "UInt32 | UInt64";
/// Accepted types for hash columns.
const HASH_TYPES: &str = "String | FixedString(N)";
/// Accepted type for timestamp columns.
const DATETIME_TYPES: &str = "DateTime";

/// One item table of the target database, with the optional framework
/// columns it actually declares. The writer populates exactly the columns
/// that exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTable {
    /// Table name
    pub name: String,
    /// Whether the table declares a `block_hash` column
    pub has_block_hash: bool,
    /// Whether the table declares a `block_timestamp` column
    pub has_block_timestamp: bool,
}

/// Shape of the reserved `blocks` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksTable {
    /// Whether the table declares a `parent_number` column
    pub has_parent_number: bool,
    /// Whether the table declares a `timestamp` column
    pub has_timestamp: bool,
}

/// The validated target-database schema.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Shape of the `blocks` table
    pub blocks: BlocksTable,
    /// Item tables, sorted by name
    pub item_tables: Vec<ItemTable>,
}

impl Schema {
    /// Names of all item tables.
    pub fn item_table_names(&self) -> Vec<String> {
        self.item_tables.iter().map(|t| t.name.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct ColumnRow {
    table: String,
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

fn is_block_number(column_type: &str) -> bool {
    matches!(column_type, "UInt32" | "UInt64")
}

fn is_hash(column_type: &str) -> bool {
    if column_type == "String" {
        return true;
    }
    column_type
        .strip_prefix("FixedString(")
        .and_then(|rest| rest.strip_suffix(')'))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn is_datetime(column_type: &str) -> bool {
    column_type == "DateTime"
}

fn require(
    table: &str,
    columns: &BTreeMap<String, String>,
    column: &str,
    accepts: fn(&str) -> bool,
    expected: &'static str,
) -> Result<(), SchemaError> {
    let found = columns.get(column).ok_or_else(|| SchemaError::MissingColumn {
        table: table.to_owned(),
        column: column.to_owned(),
    })?;
    if !accepts(found) {
        return Err(SchemaError::ColumnType {
            table: table.to_owned(),
            column: column.to_owned(),
            found: found.clone(),
            expected,
        });
    }
    Ok(())
}

/// Returns whether the optional column exists. A present column with a
/// wrong type is still an error.
fn optional(
    table: &str,
    columns: &BTreeMap<String, String>,
    column: &str,
    accepts: fn(&str) -> bool,
    expected: &'static str,
) -> Result<bool, SchemaError> {
    match columns.get(column) {
        None => Ok(false),
        Some(found) if accepts(found) => Ok(true),
        Some(found) => Err(SchemaError::ColumnType {
            table: table.to_owned(),
            column: column.to_owned(),
            found: found.clone(),
            expected,
        }),
    }
}

/// Enumerate the tables of `database`, validate them against the framework
/// contract, and return the validated schema. Columns outside the contract
/// are the operator's business and are ignored.
pub async fn inspect(store: &dyn Store, database: &str) -> Result<Schema, SchemaError> {
    let sql =
        format!("SELECT table, name, type FROM system.columns WHERE database = '{database}'");
    let rows = store.query_rows(&sql).await.map_err(|source| SchemaError::Store { source })?;
    let rows: Vec<ColumnRow> =
        decode_rows(rows).map_err(|source| SchemaError::Store { source })?;

    let mut tables: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for row in rows {
        tables.entry(row.table).or_default().insert(row.name, row.column_type);
    }

    let blocks_columns = tables.remove(BLOCKS_TABLE).ok_or(SchemaError::MissingBlocksTable)?;
    require(BLOCKS_TABLE, &blocks_columns, "number", is_block_number, BLOCK_NUMBER_TYPES)?;
    require(BLOCKS_TABLE, &blocks_columns, "hash", is_hash, HASH_TYPES)?;
    require(BLOCKS_TABLE, &blocks_columns, "parent_hash", is_hash, HASH_TYPES)?;
    let blocks = BlocksTable {
        has_parent_number: optional(
            BLOCKS_TABLE,
            &blocks_columns,
            "parent_number",
            is_block_number,
            BLOCK_NUMBER_TYPES,
        )?,
        has_timestamp: optional(
            BLOCKS_TABLE,
            &blocks_columns,
            "timestamp",
            is_datetime,
            DATETIME_TYPES,
        )?,
    };

    let mut item_tables = Vec::with_capacity(tables.len());
    for (name, columns) in &tables {
        require(name, columns, "block_number", is_block_number, BLOCK_NUMBER_TYPES)?;
        item_tables.push(ItemTable {
            name: name.clone(),
            has_block_hash: optional(name, columns, "block_hash", is_hash, HASH_TYPES)?,
            has_block_timestamp: optional(
                name,
                columns,
                "block_timestamp",
                is_datetime,
                DATETIME_TYPES,
            )?,
        });
    }

    info!(database, item_tables = item_tables.len(), "target schema validated");
    Ok(Schema { blocks, item_tables })
}

#[cfg(test)]
mod tests {
    use url::Url;

    use crate::client::StoreClient;

    use super::*;

    #[test]
    fn hash_type_predicate() {
        assert!(is_hash("String"));
        assert!(is_hash("FixedString(32)"));
        assert!(is_hash("FixedString(66)"));
        assert!(!is_hash("FixedString()"));
        assert!(!is_hash("FixedString(32"));
        assert!(!is_hash("UInt64"));
    }

    #[test]
    fn block_number_type_predicate() {
        assert!(is_block_number("UInt32"));
        assert!(is_block_number("UInt64"));
        assert!(!is_block_number("Int64"));
        assert!(!is_block_number("UInt128"));
    }

    #[test]
    fn datetime_type_predicate() {
        assert!(is_datetime("DateTime"));
        assert!(!is_datetime("DateTime64(3)"));
    }

    fn columns_response(rows: &[(&str, &str, &str)]) -> String {
        rows.iter()
            .map(|(table, name, column_type)| {
                format!(
                    "{{\"table\":\"{table}\",\"name\":\"{name}\",\"type\":\"{column_type}\"}}\n"
                )
            })
            .collect()
    }

    async fn inspect_with(rows: &[(&str, &str, &str)]) -> Result<Schema, SchemaError> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::Any)
            .with_body(columns_response(rows))
            .create_async()
            .await;
        let client = StoreClient::new(
            Url::parse(&server.url()).unwrap(),
            "analytics".to_owned(),
            "user".to_owned(),
            String::new(),
        );
        inspect(&client, "analytics").await
    }

    #[tokio::test]
    async fn missing_blocks_table_is_rejected() {
        let result = inspect_with(&[("transfers", "block_number", "UInt64")]).await;
        assert!(matches!(result, Err(SchemaError::MissingBlocksTable)));
    }

    #[tokio::test]
    async fn full_schema_is_accepted() {
        let schema = inspect_with(&[
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "FixedString(66)"),
            ("blocks", "parent_hash", "FixedString(66)"),
            ("blocks", "timestamp", "DateTime"),
            ("transfers", "block_number", "UInt64"),
            ("transfers", "block_hash", "String"),
            ("transfers", "amount", "UInt256"),
            ("pools", "block_number", "UInt32"),
        ])
        .await
        .unwrap();

        assert_eq!(schema.blocks, BlocksTable { has_parent_number: false, has_timestamp: true });
        assert_eq!(
            schema.item_tables,
            vec![
                ItemTable {
                    name: "pools".to_owned(),
                    has_block_hash: false,
                    has_block_timestamp: false
                },
                ItemTable {
                    name: "transfers".to_owned(),
                    has_block_hash: true,
                    has_block_timestamp: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn item_table_with_wrong_block_number_type_is_rejected() {
        let result = inspect_with(&[
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "String"),
            ("blocks", "parent_hash", "String"),
            ("x", "block_number", "Int64"),
        ])
        .await;

        match result {
            Err(SchemaError::ColumnType { table, column, found, .. }) => {
                assert_eq!(table, "x");
                assert_eq!(column, "block_number");
                assert_eq!(found, "Int64");
            }
            other => panic!("expected column type error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn item_table_without_block_number_is_rejected() {
        let result = inspect_with(&[
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "String"),
            ("blocks", "parent_hash", "String"),
            ("x", "amount", "UInt64"),
        ])
        .await;

        assert!(matches!(
            result,
            Err(SchemaError::MissingColumn { table, column })
                if table == "x" && column == "block_number"
        ));
    }

    #[tokio::test]
    async fn blocks_table_missing_parent_hash_is_rejected() {
        let result = inspect_with(&[
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "String"),
            ("transfers", "block_number", "UInt64"),
        ])
        .await;

        assert!(matches!(
            result,
            Err(SchemaError::MissingColumn { table, column })
                if table == "blocks" && column == "parent_hash"
        ));
    }

    #[tokio::test]
    async fn present_optional_column_with_wrong_type_is_rejected() {
        let result = inspect_with(&[
            ("blocks", "number", "UInt64"),
            ("blocks", "hash", "String"),
            ("blocks", "parent_hash", "String"),
            ("transfers", "block_number", "UInt64"),
            ("transfers", "block_timestamp", "DateTime64(3)"),
        ])
        .await;

        assert!(matches!(
            result,
            Err(SchemaError::ColumnType { table, column, .. })
                if table == "transfers" && column == "block_timestamp"
        ));
    }
}
