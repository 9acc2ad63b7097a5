use fsg_types::Cid;

use crate::block::Block;
use crate::error::StoreResult;

/// Content-addressed block store.
///
/// All implementations must satisfy these invariants:
/// - `put` is idempotent; a block already present is left untouched.
/// - A `put` racing a `get` of the same CID never exposes partial bytes.
/// - `get` on an absent CID returns [`StoreError::NotFound`], never an I/O error.
/// - Concurrent callers from different sessions never corrupt the mapping.
///
/// [`StoreError::NotFound`]: crate::StoreError::NotFound
pub trait BlockStore: Send + Sync {
    /// Store a block.
    fn put(&self, block: &Block) -> StoreResult<()>;

    /// Read a block by CID.
    fn get(&self, cid: &Cid) -> StoreResult<Block>;

    /// Check whether a block is held locally.
    fn has(&self, cid: &Cid) -> StoreResult<bool>;

    /// Delete a block. Returns `true` if it was present.
    ///
    /// Intended for garbage collection only; deleting a referenced block
    /// makes the DAGs that reference it unresolvable locally.
    fn delete(&self, cid: &Cid) -> StoreResult<bool>;

    /// Store several blocks.
    ///
    /// Default implementation calls `put()` for each block. Backends may
    /// override for better performance.
    fn put_many(&self, blocks: &[Block]) -> StoreResult<()> {
        blocks.iter().try_for_each(|block| self.put(block))
    }
}
