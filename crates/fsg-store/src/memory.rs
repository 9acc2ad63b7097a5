use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fsg_types::Cid;

use crate::block::Block;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStore;

/// In-memory, HashMap-based block store.
///
/// Intended for tests and embedding. Blocks are held behind a `RwLock`;
/// `Bytes` payloads are reference counted so reads do not copy data.
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<Cid, Block>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    fn read_map(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<Cid, Block>>> {
        self.blocks
            .read()
            .map_err(|_| StoreError::Unavailable("block map lock poisoned".into()))
    }

    fn write_map(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<Cid, Block>>> {
        self.blocks
            .write()
            .map_err(|_| StoreError::Unavailable("block map lock poisoned".into()))
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.read_map().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all stored blocks.
    pub fn total_bytes(&self) -> u64 {
        self.read_map()
            .map(|map| map.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    /// Sorted list of every CID in the store.
    pub fn all_cids(&self) -> Vec<Cid> {
        let mut cids: Vec<Cid> = self
            .read_map()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();
        cids.sort();
        cids
    }
}

impl Default for InMemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for InMemoryBlockStore {
    fn put(&self, block: &Block) -> StoreResult<()> {
        let mut map = self.write_map()?;
        map.entry(*block.cid()).or_insert_with(|| block.clone());
        Ok(())
    }

    fn get(&self, cid: &Cid) -> StoreResult<Block> {
        self.read_map()?
            .get(cid)
            .cloned()
            .ok_or(StoreError::NotFound(*cid))
    }

    fn has(&self, cid: &Cid) -> StoreResult<bool> {
        Ok(self.read_map()?.contains_key(cid))
    }

    fn delete(&self, cid: &Cid) -> StoreResult<bool> {
        Ok(self.write_map()?.remove(cid).is_some())
    }

    fn put_many(&self, blocks: &[Block]) -> StoreResult<()> {
        let mut map = self.write_map()?;
        for block in blocks {
            map.entry(*block.cid()).or_insert_with(|| block.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlockStore")
            .field("block_count", &self.len())
            .finish()
    }
}
