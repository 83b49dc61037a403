//! An in-memory data source over pre-built batches.
//!
//! Useful for engine tests and small local backfills. Supports scripting
//! several stream "phases": each `create_stream` call plays the next phase,
//! which is how reorg scenarios are modeled (the restarted stream serves the
//! new canonical chain).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use primitives::{Block, BlockHeader, BlockRef, DataBatch};

use crate::{BatchStream, DataSource, SourceError};

/// A block that carries nothing but its header. Enough for pipelines whose
/// mapping functions only need block identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// The block header
    pub header: BlockHeader,
}

impl HeaderBlock {
    /// Wrap a header.
    pub const fn new(header: BlockHeader) -> Self {
        Self { header }
    }
}

impl Block for HeaderBlock {
    fn header(&self) -> &BlockHeader {
        &self.header
    }
}

/// In-memory data source
#[derive(Debug)]
pub struct MemorySource<B> {
    phases: Vec<Vec<DataBatch<B>>>,
    canonical: Vec<BlockRef>,
    streams_opened: AtomicUsize,
}

impl<B> MemorySource<B> {
    /// A source that serves `batches` on every stream (re)start.
    pub fn new(batches: Vec<DataBatch<B>>) -> Self {
        Self::scripted(vec![batches])
    }

    /// A source whose n-th `create_stream` call serves the n-th phase; the
    /// last phase repeats once the script is exhausted.
    pub fn scripted(phases: Vec<Vec<DataBatch<B>>>) -> Self {
        assert!(!phases.is_empty(), "scripted source needs at least one phase");
        Self { phases, canonical: Vec::new(), streams_opened: AtomicUsize::new(0) }
    }

    /// Teach the source which block refs are canonical, enabling
    /// [`DataSource::find_canonical`].
    pub fn with_canonical(mut self, canonical: Vec<BlockRef>) -> Self {
        self.canonical = canonical;
        self
    }

    /// How many streams have been opened so far.
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B> DataSource for MemorySource<B>
where
    B: Block + Clone + Send + Sync + 'static,
{
    type Block = B;

    async fn create_stream(
        &self,
        after: Option<BlockRef>,
    ) -> Result<BatchStream<Self::Block>, SourceError> {
        let call = self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let phase = &self.phases[call.min(self.phases.len() - 1)];
        let resume_after = after.map(|r| r.number);

        let batches: Vec<Result<DataBatch<B>, SourceError>> = phase
            .iter()
            .cloned()
            .map(|mut batch| {
                if let Some(after) = resume_after {
                    batch.blocks.retain(|b| b.header().number > after);
                }
                Ok(batch)
            })
            .collect();

        Ok(Box::pin(tokio_stream::iter(batches)))
    }

    async fn find_canonical(
        &self,
        candidates: &[BlockRef],
    ) -> Result<Option<BlockRef>, SourceError> {
        if self.canonical.is_empty() {
            return Err(SourceError::Unsupported { operation: "canonical chain probing" });
        }
        Ok(candidates
            .iter()
            .filter(|c| self.canonical.contains(c))
            .max_by_key(|c| c.number)
            .cloned())
    }
}
