//! The data-source contract consumed by the processing loop.
//!
//! Concrete transports (portal HTTP streams, archive readers) live in
//! downstream crates; the loop only sees a restartable sequence of batches.

/// In-memory source for tests and local backfills
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use derive_more::{Display, Error};
use futures::stream::Stream;

use primitives::{Block, BlockRef, DataBatch};

pub use memory::{HeaderBlock, MemorySource};

/// Lazy sequence of data batches. Infinite unless the underlying stream
/// ends; restartable by calling [`DataSource::create_stream`] again.
pub type BatchStream<B> = Pin<Box<dyn Stream<Item = Result<DataBatch<B>, SourceError>> + Send>>;

/// Failure raised by a data source. Always fatal to the processing loop
/// (after a best-effort flush of already-mapped data).
#[derive(Debug, Display, Error)]
pub enum SourceError {
    /// The stream broke and could not be resumed by the source itself.
    #[display("data source stream failed: {message}")]
    Stream {
        /// Description of the failure
        message: String,
    },
    /// The source cannot answer this kind of request.
    #[display("data source does not support {operation}")]
    Unsupported {
        /// The unsupported operation
        operation: &'static str,
    },
}

/// A paged, restartable producer of block batches.
///
/// Blocks arrive in ascending `number` order. A block whose `parent_hash`
/// disagrees with the previously emitted block's `hash` signals a chain
/// reorganization; sources delivering only finalized blocks never do this.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Block type this source yields.
    type Block: Block + Send + Sync + 'static;

    /// Open a stream of batches resuming strictly after `after` (from the
    /// lowest available block when `None`).
    async fn create_stream(
        &self,
        after: Option<BlockRef>,
    ) -> Result<BatchStream<Self::Block>, SourceError>;

    /// Return the highest of `candidates` that is on the canonical chain,
    /// if any. Used by the loop to locate the fork point after a reorg.
    ///
    /// Sources that only deliver finalized blocks never get asked and may
    /// keep the default.
    async fn find_canonical(
        &self,
        candidates: &[BlockRef],
    ) -> Result<Option<BlockRef>, SourceError> {
        let _ = candidates;
        Err(SourceError::Unsupported { operation: "canonical chain probing" })
    }
}
