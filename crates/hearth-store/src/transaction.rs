use async_trait::async_trait;
use hearth_types::{Block, Cid};
use serde_json::Value;

use crate::error::StoreResult;
use crate::memory::MemoryBlockStore;
use crate::traits::{BlockFetcher, BlockStore};

/// The blocks touched by one commit or compaction.
///
/// A transaction is packed into exactly one CAR. Blocks keep the order in
/// which they were added, and adding a block twice keeps the first copy.
#[derive(Debug, Default)]
pub struct CarTransaction {
    blocks: MemoryBlockStore,
}

impl CarTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block, returning its CID.
    pub fn put(&self, block: Block) -> StoreResult<Cid> {
        let cid = *block.cid();
        self.blocks.put(block)?;
        Ok(cid)
    }

    /// Encode `value` as a JSON block and add it.
    pub fn put_json(&self, value: &Value) -> StoreResult<Block> {
        let block = Block::encode_json(value)?;
        self.blocks.put(block.clone())?;
        Ok(block)
    }

    pub fn get(&self, cid: &Cid) -> Option<Block> {
        self.blocks.get(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks in insertion order.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.blocks()
    }
}

#[async_trait]
impl BlockFetcher for CarTransaction {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        Ok(self.get(cid))
    }
}
