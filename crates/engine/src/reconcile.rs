//! Restart and reorg reconciliation.
//!
//! The `blocks` table is the authoritative head cursor: everything an item
//! table holds above the committed head is debris from a crash or a fork and
//! gets deleted before any new data is pushed. The deletes are idempotent,
//! so a crash mid-reconcile is repaired by the next run.

use tracing::info;

use store::{Store, StoreError};

/// Delete every item-table row strictly above `head` (every row at all when
/// there is no head). Never touches the `blocks` table.
pub async fn reconcile(
    store: &dyn Store,
    database: &str,
    item_tables: &[String],
    head: Option<u64>,
) -> Result<(), StoreError> {
    let predicate = match head {
        Some(number) => format!("block_number > {number}"),
        None => "block_number >= 0".to_owned(),
    };

    for table in item_tables {
        store.command(&format!("DELETE FROM {database}.{table} WHERE {predicate}")).await?;
    }

    info!(tables = item_tables.len(), head, "reconciled item tables with head cursor");
    Ok(())
}
