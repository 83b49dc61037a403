//! Per-table buffered insert engine with watermark batching, parallel
//! flushes, and ordered `blocks`-table publication.
//!
//! Every item table owns one buffer. Rows accumulate until a buffer crosses
//! its low watermark, at which point a background flush ships them in one
//! `JSONEachRow` insert; flushes for distinct tables run concurrently, while
//! a single table's flushes are strictly serial. A row lands in the `blocks`
//! table only once every item table is durable up to that block number, so
//! `blocks` is the authoritative "officially done" cursor no matter how the
//! per-table flushes interleave.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use eyre::ensure;
use tokio::sync::Notify;
use tracing::{debug, error};

use primitives::{BlockHeader, RowSet, TableOptions, TableRow, BLOCKS_TABLE};
use store::{Schema, Store};

use crate::error::WriterError;

/// A row tagged with the block it belongs to. Framework columns are merged
/// into the row map at push time; JSON encoding waits until flush time so a
/// watermark batch serializes once.
#[derive(Debug)]
struct PendingRow {
    number: u64,
    row: TableRow,
}

/// Rows currently owned by a background flush.
#[derive(Debug)]
struct InFlight {
    count: usize,
    lowest_number: u64,
}

#[derive(Debug, Default)]
struct BufferState {
    rows: VecDeque<PendingRow>,
    in_flight: Option<InFlight>,
    error: Option<WriterError>,
}

impl BufferState {
    /// Rows not yet durable: queued plus handed to an in-flight insert.
    fn pending_rows(&self) -> usize {
        self.rows.len() + self.in_flight.as_ref().map_or(0, |f| f.count)
    }

    /// Lowest block number still buffered or in flight, if any.
    fn floor(&self) -> Option<u64> {
        let queued = self.rows.front().map(|r| r.number);
        let flying = self.in_flight.as_ref().map(|f| f.lowest_number);
        match (queued, flying) {
            (Some(q), Some(f)) => Some(q.min(f)),
            (q, f) => q.or(f),
        }
    }

    fn is_idle(&self) -> bool {
        self.rows.is_empty() && self.in_flight.is_none()
    }
}

#[derive(Debug)]
struct TableBuffer {
    name: String,
    options: TableOptions,
    /// Item tables: merge `block_hash` into pushed rows.
    with_block_hash: bool,
    /// Item tables: merge `block_timestamp` into pushed rows.
    with_block_timestamp: bool,
    state: Mutex<BufferState>,
}

impl TableBuffer {
    fn new(name: String, options: TableOptions, with_hash: bool, with_timestamp: bool) -> Self {
        Self {
            name,
            options,
            with_block_hash: with_hash,
            with_block_timestamp: with_timestamp,
            state: Mutex::new(BufferState::default()),
        }
    }

    fn is_blocks(&self) -> bool {
        self.name == BLOCKS_TABLE
    }
}

/// How much of the `blocks` buffer the commit barrier allows to ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Barrier {
    /// Every item table is idle up to its queue; all blocks rows may ship.
    Unlimited,
    /// Blocks rows up to and including this number may ship.
    UpTo(u64),
    /// Some item table still holds rows for block 0; nothing may ship.
    Hold,
}

struct Inner {
    store: Arc<dyn Store>,
    tables: HashMap<String, Arc<TableBuffer>>,
    blocks: Arc<TableBuffer>,
    /// `blocks` rows: include `parent_number` when the column exists.
    blocks_parent_number: bool,
    /// `blocks` rows: include `timestamp` when the column exists.
    blocks_timestamp: bool,
    /// Woken on every flush completion; `drain`/`flush` waiters re-check.
    notify: Notify,
    /// Highest block number accepted so far; pushes must strictly ascend.
    last_accepted: Mutex<Option<u64>>,
}

/// Buffered, watermark-batched writer over one target database.
#[derive(Clone)]
pub struct BlockWriter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BlockWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWriter").field("tables", &self.inner.tables.len()).finish()
    }
}

impl BlockWriter {
    /// Build a writer for a validated schema. `overrides` supplies per-table
    /// watermark options (including for `blocks`); tables not listed use the
    /// defaults.
    pub fn new(
        store: Arc<dyn Store>,
        schema: &Schema,
        overrides: &HashMap<String, TableOptions>,
    ) -> eyre::Result<Self> {
        for (name, options) in overrides {
            ensure!(
                name == BLOCKS_TABLE || schema.item_tables.iter().any(|t| t.name == *name),
                "table options given for unknown table '{name}'"
            );
            ensure!(
                options.is_valid(),
                "invalid watermarks for table '{name}': low must be > 0 and <= high"
            );
        }

        let tables = schema
            .item_tables
            .iter()
            .map(|table| {
                let options = overrides.get(&table.name).copied().unwrap_or_default();
                let buffer = TableBuffer::new(
                    table.name.clone(),
                    options,
                    table.has_block_hash,
                    table.has_block_timestamp,
                );
                (table.name.clone(), Arc::new(buffer))
            })
            .collect();

        let blocks_options =
            overrides.get(BLOCKS_TABLE).copied().unwrap_or_else(TableOptions::blocks);
        let blocks =
            Arc::new(TableBuffer::new(BLOCKS_TABLE.to_owned(), blocks_options, false, false));

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                tables,
                blocks,
                blocks_parent_number: schema.blocks.has_parent_number,
                blocks_timestamp: schema.blocks.has_timestamp,
                notify: Notify::new(),
                last_accepted: Mutex::new(None),
            }),
        })
    }

    /// Append one block's row sets to the table buffers and one row to the
    /// `blocks` buffer. Synchronous: backpressure belongs to [`Self::drain`],
    /// which callers await before pushing.
    pub fn push(&self, header: &BlockHeader, rows: RowSet) -> Result<(), WriterError> {
        for table in rows.keys() {
            if !self.inner.tables.contains_key(table) {
                return Err(WriterError::UnknownTable { table: table.clone() });
            }
        }

        {
            let mut last = self.inner.last_accepted.lock().expect("writer lock poisoned");
            debug_assert!(
                last.map_or(true, |n| header.number > n),
                "blocks must be pushed in ascending number order"
            );
            *last = Some(header.number);
        }

        let mut touched = Vec::with_capacity(rows.len());
        for (table, table_rows) in rows {
            if table_rows.is_empty() {
                continue;
            }
            let buffer = Arc::clone(&self.inner.tables[&table]);
            {
                let mut state = buffer.state.lock().expect("buffer lock poisoned");
                for mut row in table_rows {
                    row.insert("block_number".to_owned(), header.number.into());
                    if buffer.with_block_hash {
                        row.insert("block_hash".to_owned(), header.hash.clone().into());
                    }
                    if buffer.with_block_timestamp {
                        if let Some(ts) = header.timestamp {
                            row.insert("block_timestamp".to_owned(), ts.into());
                        }
                    }
                    state.rows.push_back(PendingRow { number: header.number, row });
                }
            }
            touched.push(buffer);
        }

        {
            let mut row = TableRow::new();
            row.insert("number".to_owned(), header.number.into());
            row.insert("hash".to_owned(), header.hash.clone().into());
            row.insert("parent_hash".to_owned(), header.parent_hash.clone().into());
            if self.inner.blocks_parent_number {
                if let Some(parent_number) = header.parent_number {
                    row.insert("parent_number".to_owned(), parent_number.into());
                }
            }
            if self.inner.blocks_timestamp {
                if let Some(ts) = header.timestamp {
                    row.insert("timestamp".to_owned(), ts.into());
                }
            }
            let mut state = self.inner.blocks.state.lock().expect("buffer lock poisoned");
            state.rows.push_back(PendingRow { number: header.number, row });
        }

        for buffer in &touched {
            Inner::maybe_flush(&self.inner, buffer, false);
        }
        let blocks = Arc::clone(&self.inner.blocks);
        Inner::maybe_flush(&self.inner, &blocks, false);
        Ok(())
    }

    /// The caller's backpressure gate: completes once every buffer's pending
    /// rows are at or below its high watermark. Re-raises any recorded flush
    /// error.
    pub async fn drain(&self) -> Result<(), WriterError> {
        loop {
            // Register as a waiter before re-checking state, so a flush
            // completing in between cannot be missed.
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            self.first_error()?;
            let below_high = self.inner.buffers().all(|buffer| {
                let state = buffer.state.lock().expect("buffer lock poisoned");
                state.pending_rows() <= buffer.options.high_watermark as usize
            });
            if below_high {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Flush everything: completes when every currently buffered row has
    /// been durably inserted and the `blocks` rows committing those blocks
    /// have been inserted too. Low watermarks are ignored.
    pub async fn flush(&self) -> Result<(), WriterError> {
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            self.first_error()?;

            let mut items_busy = false;
            for buffer in self.inner.tables.values() {
                Inner::maybe_flush(&self.inner, buffer, true);
                if !buffer.state.lock().expect("buffer lock poisoned").is_idle() {
                    items_busy = true;
                }
            }

            if !items_busy {
                let blocks = Arc::clone(&self.inner.blocks);
                Inner::maybe_flush(&self.inner, &blocks, true);
                if blocks.state.lock().expect("buffer lock poisoned").is_idle() {
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// False once any buffer has recorded a flush error.
    pub fn is_healthy(&self) -> bool {
        self.first_error().is_ok()
    }

    fn first_error(&self) -> Result<(), WriterError> {
        for buffer in self.inner.buffers() {
            let state = buffer.state.lock().expect("buffer lock poisoned");
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

impl Inner {
    fn buffers(&self) -> impl Iterator<Item = &Arc<TableBuffer>> {
        self.tables.values().chain(std::iter::once(&self.blocks))
    }

    /// The highest block number the `blocks` table may currently publish:
    /// nothing above a block still pending in some item table.
    fn commit_barrier(&self) -> Barrier {
        let mut limit: Option<u64> = None;
        for buffer in self.tables.values() {
            let floor = buffer.state.lock().expect("buffer lock poisoned").floor();
            if let Some(floor) = floor {
                match floor.checked_sub(1) {
                    None => return Barrier::Hold,
                    Some(this) => limit = Some(limit.map_or(this, |prev| prev.min(this))),
                }
            }
        }
        limit.map_or(Barrier::Unlimited, Barrier::UpTo)
    }

    /// Start a background flush for `buffer` if its state calls for one.
    /// With `force`, the low watermark is ignored (chain-head and final
    /// flushes).
    fn maybe_flush(inner: &Arc<Self>, buffer: &Arc<TableBuffer>, force: bool) {
        // The barrier reads the item-table locks, so compute it before
        // taking the blocks lock.
        let barrier = buffer.is_blocks().then(|| inner.commit_barrier());

        let batch = {
            let mut state = buffer.state.lock().expect("buffer lock poisoned");
            if state.error.is_some() || state.in_flight.is_some() || state.rows.is_empty() {
                return;
            }
            if !force && state.rows.len() < buffer.options.low_watermark as usize {
                return;
            }
            let take = match barrier {
                None | Some(Barrier::Unlimited) => state.rows.len(),
                Some(Barrier::UpTo(limit)) => {
                    state.rows.iter().take_while(|r| r.number <= limit).count()
                }
                Some(Barrier::Hold) => 0,
            };
            if take == 0 {
                return;
            }
            let batch: Vec<PendingRow> = state.rows.drain(..take).collect();
            state.in_flight = Some(InFlight {
                count: batch.len(),
                lowest_number: batch.first().map_or(0, |r| r.number),
            });
            batch
        };

        let inner = Arc::clone(inner);
        let buffer = Arc::clone(buffer);
        tokio::spawn(async move {
            Self::run_flush(inner, buffer, batch).await;
        });
    }

    async fn run_flush(inner: Arc<Self>, buffer: Arc<TableBuffer>, batch: Vec<PendingRow>) {
        let rows = batch.len();
        let up_to_block = batch.last().map_or(0, |r| r.number);
        let body = encode_rows(&batch);

        match inner.store.insert(&buffer.name, body).await {
            Ok(()) => {
                buffer.state.lock().expect("buffer lock poisoned").in_flight = None;
                debug!(table = %buffer.name, rows, up_to_block, "flushed rows");
                inner.notify.notify_waiters();
                // Rows pushed during the flight may already warrant the next
                // flush, and an item-table flush can move the commit barrier.
                Self::maybe_flush(&inner, &buffer, false);
                if !buffer.is_blocks() {
                    let blocks = Arc::clone(&inner.blocks);
                    Self::maybe_flush(&inner, &blocks, false);
                }
            }
            Err(e) => {
                error!(table = %buffer.name, rows, error = %e, "flush failed; writer unhealthy");
                let mut state = buffer.state.lock().expect("buffer lock poisoned");
                state.in_flight = None;
                for row in batch.into_iter().rev() {
                    state.rows.push_front(row);
                }
                state.error =
                    Some(WriterError::Flush { table: buffer.name.clone(), message: e.to_string() });
                drop(state);
                inner.notify.notify_waiters();
            }
        }
    }
}

/// Encode a flush batch as one `JSONEachRow` body.
fn encode_rows(batch: &[PendingRow]) -> Bytes {
    let mut buf = Vec::with_capacity(batch.len() * 64);
    for pending in batch {
        // A JSON map of JSON values cannot fail to serialize.
        serde_json::to_writer(&mut buf, &pending.row).expect("row serialization");
        buf.push(b'\n');
    }
    Bytes::from(buf)
}
