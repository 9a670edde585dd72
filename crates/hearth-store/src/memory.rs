use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use hearth_types::{Block, Cid};

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlockFetcher, BlockStore};

#[derive(Default)]
struct Inner {
    blocks: HashMap<Cid, Bytes>,
    order: Vec<Cid>,
}

/// In-memory, `HashMap`-based block store.
///
/// Used as the loader's block cache and as the backing map of a
/// [`CarTransaction`](crate::CarTransaction). Insertion order is kept so
/// that packing a store into a CAR is deterministic.
pub struct MemoryBlockStore {
    inner: RwLock<Inner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all blocks.
    pub fn total_bytes(&self) -> usize {
        self.inner
            .read()
            .expect("lock poisoned")
            .blocks
            .values()
            .map(Bytes::len)
            .sum()
    }

    /// All blocks, in insertion order.
    pub fn blocks(&self) -> Vec<Block> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|cid| {
                inner
                    .blocks
                    .get(cid)
                    .map(|bytes| (*cid, bytes.clone()))
            })
            .filter_map(|(cid, bytes)| Block::with_cid(cid, bytes).ok())
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.blocks.clear();
        inner.order.clear();
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, block: Block) -> StoreResult<()> {
        if !block.verify() {
            return Err(StoreError::HashMismatch { cid: *block.cid() });
        }
        let (cid, bytes) = block.into_parts();
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.blocks.contains_key(&cid) {
            return Ok(());
        }
        inner.blocks.insert(cid, bytes);
        inner.order.push(cid);
        Ok(())
    }

    fn get(&self, cid: &Cid) -> Option<Block> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .blocks
            .get(cid)
            .and_then(|bytes| Block::with_cid(*cid, bytes.clone()).ok())
    }

    fn contains(&self, cid: &Cid) -> bool {
        self.inner
            .read()
            .expect("lock poisoned")
            .blocks
            .contains_key(cid)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Block> + Send + '_> {
        Box::new(self.blocks().into_iter())
    }
}

#[async_trait]
impl BlockFetcher for MemoryBlockStore {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        Ok(self.get(cid))
    }
}

impl std::fmt::Debug for MemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockStore")
            .field("block_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::Codec;

    fn raw(data: &[u8]) -> Block {
        Block::new(Codec::Raw, data.to_vec())
    }

    // ---------------------------------------------------------------
    // Basic operations
    // ---------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = MemoryBlockStore::new();
        let block = raw(b"hello");
        store.put(block.clone()).unwrap();
        assert_eq!(store.get(block.cid()), Some(block.clone()));
        assert!(store.contains(block.cid()));
    }

    #[test]
    fn get_missing_is_none() {
        let store = MemoryBlockStore::new();
        assert!(store.get(raw(b"nope").cid()).is_none());
    }

    #[test]
    fn put_is_idempotent() {
        let store = MemoryBlockStore::new();
        store.put(raw(b"dup")).unwrap();
        store.put(raw(b"dup")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_cid_keeps_first_bytes() {
        let store = MemoryBlockStore::new();
        let block = raw(b"honest");
        store.put(block.clone()).unwrap();
        let again = Block::with_cid(*block.cid(), b"honest".to_vec()).unwrap();
        store.put(again).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(block.cid()).unwrap().bytes().as_ref(), b"honest");
        assert!(Block::with_cid(*block.cid(), b"forged".to_vec()).is_err());
    }

    // ---------------------------------------------------------------
    // Ordering and iteration
    // ---------------------------------------------------------------

    #[test]
    fn entries_follow_insertion_order() {
        let store = MemoryBlockStore::new();
        let blocks: Vec<Block> = (0..5u8).map(|i| raw(&[i])).collect();
        for b in blocks.iter().rev() {
            store.put(b.clone()).unwrap();
        }
        let seen: Vec<Block> = store.entries().collect();
        let expected: Vec<Block> = blocks.into_iter().rev().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn entries_are_restartable() {
        let store = MemoryBlockStore::new();
        store.put(raw(b"a")).unwrap();
        store.put(raw(b"b")).unwrap();
        assert_eq!(store.entries().count(), 2);
        assert_eq!(store.entries().count(), 2);
    }

    #[test]
    fn total_bytes_and_clear() {
        let store = MemoryBlockStore::new();
        store.put(raw(b"abc")).unwrap();
        store.put(raw(b"de")).unwrap();
        assert_eq!(store.total_bytes(), 5);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.entries().count(), 0);
    }

    #[tokio::test]
    async fn fetch_delegates_to_get() {
        let store = MemoryBlockStore::new();
        let block = raw(b"async");
        store.put(block.clone()).unwrap();
        assert_eq!(store.fetch(block.cid()).await.unwrap(), Some(block));
        assert!(store.fetch(raw(b"x").cid()).await.unwrap().is_none());
    }
}
