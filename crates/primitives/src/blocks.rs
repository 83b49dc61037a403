//! Block identity, header, and batch data structures.

use serde::{Deserialize, Serialize};

/// Identifies a block. Used as the resume marker handed to the data source
/// and as the head cursor read back from the `blocks` table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlockRef {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: String,
}

/// The part of a block the framework understands. Domain payloads (logs,
/// state diffs, instructions) live on the concrete [`Block`] type and are
/// only ever seen by the user mapping function.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: String,
    /// Hash of the parent block
    pub parent_hash: String,
    /// Parent block number, for chains where numbering is not dense
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_number: Option<u64>,
    /// Block timestamp in epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl BlockHeader {
    /// The `(number, hash)` reference of this block.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef { number: self.number, hash: self.hash.clone() }
    }
}

/// A chain record with a header. Implemented by whatever block type a data
/// source yields.
pub trait Block {
    /// The block header.
    fn header(&self) -> &BlockHeader;
}

/// A batch of blocks pulled from the data source, in ascending `number`
/// order, together with the source's best estimate of the chain head at the
/// time the batch was produced.
#[derive(Debug, Clone)]
pub struct DataBatch<B> {
    /// Blocks in ascending number order. May be empty.
    pub blocks: Vec<B>,
    /// Current best known tip, if the source reports one.
    pub head_number: Option<u64>,
}

impl<B: Block> DataBatch<B> {
    /// Whether this batch reached the chain head: an empty batch, no head
    /// estimate, or a head estimate at or below the last block in the batch.
    pub fn reached_head(&self) -> bool {
        match (self.blocks.last(), self.head_number) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(last), Some(head)) => head <= last.header().number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain(BlockHeader);

    impl Block for Plain {
        fn header(&self) -> &BlockHeader {
            &self.0
        }
    }

    fn block(number: u64) -> Plain {
        Plain(BlockHeader {
            number,
            hash: format!("0x{number:02x}"),
            parent_hash: format!("0x{:02x}", number.saturating_sub(1)),
            parent_number: None,
            timestamp: None,
        })
    }

    #[test]
    fn empty_batch_reaches_head() {
        let batch: DataBatch<Plain> = DataBatch { blocks: vec![], head_number: Some(500) };
        assert!(batch.reached_head());
    }

    #[test]
    fn batch_without_head_estimate_reaches_head() {
        let batch = DataBatch { blocks: vec![block(100)], head_number: None };
        assert!(batch.reached_head());
    }

    #[test]
    fn batch_behind_head_estimate_does_not_reach_head() {
        let batch = DataBatch { blocks: vec![block(100), block(101)], head_number: Some(200) };
        assert!(!batch.reached_head());
    }

    #[test]
    fn batch_at_head_estimate_reaches_head() {
        let batch = DataBatch { blocks: vec![block(200)], head_number: Some(200) };
        assert!(batch.reached_head());
    }

    #[test]
    fn header_optional_fields_skip_serialization() {
        let header = BlockHeader {
            number: 7,
            hash: "0x07".into(),
            parent_hash: "0x06".into(),
            parent_number: None,
            timestamp: None,
        };
        let json = serde_json::to_value(&header).unwrap();
        assert!(json.get("parent_number").is_none());
        assert!(json.get("timestamp").is_none());
    }
}
