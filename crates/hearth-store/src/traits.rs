use async_trait::async_trait;
use hearth_types::{Block, Cid};

use crate::error::StoreResult;

/// Local, synchronous block map.
///
/// All implementations must satisfy:
/// - `put` rejects blocks whose bytes do not hash to their CID.
/// - `put` of an existing CID is a no-op.
/// - `entries` yields every stored block exactly once, in insertion order.
pub trait BlockStore: Send + Sync {
    fn put(&self, block: Block) -> StoreResult<()>;

    /// Returns `None` if the block is not held locally.
    fn get(&self, cid: &Cid) -> Option<Block>;

    fn contains(&self, cid: &Cid) -> bool {
        self.get(cid).is_some()
    }

    /// Snapshot iterator over stored blocks. Restartable: every call starts
    /// from the first block.
    fn entries(&self) -> Box<dyn Iterator<Item = Block> + Send + '_>;
}

/// Asynchronous block lookup, possibly backed by remote storage.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Returns `Ok(None)` if no source holds the block; `Err` only when a
    /// source failed while looking.
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>>;
}
