//! The processing loop: drives a data source, maps blocks, and feeds the
//! block writer under backpressure.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use primitives::{Block, BlockRef, DataBatch, RowSet, TableOptions, BLOCKS_TABLE};
use source::DataSource;
use store::{decode_rows, inspect, latest_block_ref, Schema, Store};

use crate::{metrics::Progress, reconcile::reconcile, writer::BlockWriter};

/// Cadence of the status line.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// How many recent committed blocks to probe for the fork point on a reorg.
const FORK_PROBE_WINDOW: u64 = 100;

/// User-supplied per-block mapping function.
///
/// Must be pure with respect to the block: equal blocks produce equal
/// outputs. Output keys must name item tables of the target schema; a table
/// absent from the output emits no rows for the block.
#[async_trait]
pub trait BlockMap<B: Block>: Send + Sync {
    /// Map one block to its per-table row sets.
    async fn map(&self, block: &B) -> Result<RowSet>;
}

/// Any sync closure from block to row sets is a mapping function.
#[async_trait]
impl<B, F> BlockMap<B> for F
where
    B: Block + Sync,
    F: Fn(&B) -> Result<RowSet> + Send + Sync,
{
    async fn map(&self, block: &B) -> Result<RowSet> {
        self(block)
    }
}

/// Everything a processing run needs.
pub struct ProcessorArgs<S, M> {
    /// Store handle shared by all flushes
    pub store: Arc<dyn Store>,
    /// Target database name
    pub database: String,
    /// Per-table watermark overrides (may include `blocks`)
    pub tables: HashMap<String, TableOptions>,
    /// The data source to drive
    pub source: S,
    /// The per-block mapping function
    pub map: M,
}

/// Run the processing loop to completion.
///
/// Validates the target schema, reconciles item tables with the committed
/// head, then streams batches from the source: map, drain, push, and flush
/// at the chain head. Returns when the stream ends; any error is re-raised
/// after a best-effort flush of the data already mapped.
pub async fn run<S, M>(args: ProcessorArgs<S, M>) -> Result<()>
where
    S: DataSource,
    M: BlockMap<S::Block>,
{
    let ProcessorArgs { store, database, tables, source, map } = args;

    let schema = inspect(store.as_ref(), &database)
        .await
        .wrap_err_with(|| format!("schema validation failed for database '{database}'"))?;
    let item_tables = schema.item_table_names();

    let head = latest_block_ref(store.as_ref(), &database)
        .await
        .wrap_err("reading the head cursor failed")?;
    info!(
        database,
        head = head.as_ref().map(|h| h.number),
        item_tables = item_tables.len(),
        "starting processor"
    );

    reconcile(store.as_ref(), &database, &item_tables, head.as_ref().map(|h| h.number))
        .await
        .wrap_err("startup reconciliation failed")?;

    let mut writer = BlockWriter::new(Arc::clone(&store), &schema, &tables)?;

    let ctx = Run {
        store: &store,
        database: &database,
        schema: &schema,
        item_tables: &item_tables,
        options: &tables,
        source: &source,
        map: &map,
    };
    let result = ctx.stream_loop(&mut writer, head).await;

    if result.is_err() && writer.is_healthy() {
        // Commit what was mapped before the failure; the error itself still
        // propagates to the runner.
        if let Err(flush_error) = writer.flush().await {
            warn!(error = %flush_error, "final flush after failure did not complete");
        }
    }
    result
}

/// Borrowed context for one processing run.
struct Run<'a, S, M> {
    store: &'a Arc<dyn Store>,
    database: &'a str,
    schema: &'a Schema,
    item_tables: &'a [String],
    options: &'a HashMap<String, TableOptions>,
    source: &'a S,
    map: &'a M,
}

/// Outcome of one batch: keep streaming, or restart after a rollback.
enum BatchOutcome {
    Continue,
    ForkDetected,
}

impl<S, M> Run<'_, S, M>
where
    S: DataSource,
    M: BlockMap<S::Block>,
{
    async fn stream_loop(&self, writer: &mut BlockWriter, head: Option<BlockRef>) -> Result<()> {
        let mut progress = Progress::new();
        let mut last_ref = head.clone();
        let mut stream = self.source.create_stream(head).await?;
        let mut status = interval_at(Instant::now() + STATUS_INTERVAL, STATUS_INTERVAL);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                batch = stream.next() => match batch {
                    None => {
                        writer.flush().await?;
                        progress.report();
                        info!("data stream ended");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e).wrap_err("data source failed"),
                    Some(Ok(batch)) => {
                        let outcome = self
                            .process_batch(&batch, writer, &mut last_ref, &mut progress)
                            .await?;
                        match outcome {
                            BatchOutcome::Continue => {
                                if batch.reached_head() {
                                    writer.flush().await?;
                                }
                            }
                            BatchOutcome::ForkDetected => {
                                let new_head = self.rollback(writer).await?;
                                *writer = BlockWriter::new(
                                    Arc::clone(self.store),
                                    self.schema,
                                    self.options,
                                )?;
                                last_ref = Some(new_head.clone());
                                stream = self.source.create_stream(Some(new_head)).await?;
                            }
                        }
                    }
                },
                _ = status.tick() => progress.report(),
            }
        }
    }

    async fn process_batch(
        &self,
        batch: &DataBatch<S::Block>,
        writer: &BlockWriter,
        last_ref: &mut Option<BlockRef>,
        progress: &mut Progress,
    ) -> Result<BatchOutcome> {
        for block in &batch.blocks {
            let header = block.header();
            if let Some(prev) = last_ref.as_ref() {
                if header.parent_hash != prev.hash {
                    warn!(
                        block = header.number,
                        parent_hash = %header.parent_hash,
                        expected = %prev.hash,
                        "parent hash mismatch, chain reorganization detected"
                    );
                    return Ok(BatchOutcome::ForkDetected);
                }
            }

            let rows = self
                .map
                .map(block)
                .await
                .wrap_err_with(|| format!("mapping block {} failed", header.number))?;
            let row_count: usize = rows.values().map(Vec::len).sum();

            writer.drain().await?;
            writer.push(header, rows)?;

            progress.record(1, row_count as u64);
            *last_ref = Some(header.block_ref());
        }
        Ok(BatchOutcome::Continue)
    }

    /// Walk back to the highest committed block still on the canonical
    /// chain, rewind the `blocks` cursor, and clear item tables above it.
    async fn rollback(&self, writer: &BlockWriter) -> Result<BlockRef> {
        writer.flush().await.wrap_err("flush before rollback failed")?;

        let sql = format!(
            "SELECT number, hash FROM {}.{BLOCKS_TABLE} \
             ORDER BY number DESC LIMIT {FORK_PROBE_WINDOW}",
            self.database
        );
        let candidates: Vec<BlockRef> = decode_rows(self.store.query_rows(&sql).await?)?;

        let new_head = self
            .source
            .find_canonical(&candidates)
            .await?
            .ok_or_else(|| {
                eyre::eyre!(
                    "no canonical ancestor among the last {FORK_PROBE_WINDOW} committed blocks"
                )
            })?;
        info!(new_head = new_head.number, hash = %new_head.hash, "rolling back to fork point");

        self.store
            .command(&format!(
                "DELETE FROM {}.{BLOCKS_TABLE} WHERE number > {}",
                self.database, new_head.number
            ))
            .await?;
        reconcile(self.store.as_ref(), self.database, self.item_tables, Some(new_head.number))
            .await
            .wrap_err("rollback reconciliation failed")?;

        Ok(new_head)
    }
}
