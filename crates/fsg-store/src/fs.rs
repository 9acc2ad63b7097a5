use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fsg_crypto::ContentHasher;
use fsg_types::Cid;
use tempfile::NamedTempFile;

use crate::block::Block;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStore;

/// Filesystem block store.
///
/// Each block is one file at `<root>/<first two hex chars>/<hex digest>`.
/// Writes go to a temporary file in the shard directory and are renamed
/// into place, so a concurrent reader sees either nothing or the whole block.
#[derive(Debug, Clone)]
pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| unavailable("create root", &root, e))?;
        tracing::debug!(root = %root.display(), "opened block store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, cid: &Cid) -> PathBuf {
        let hex = cid.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }
}

fn unavailable(op: &str, path: &Path, err: io::Error) -> StoreError {
    StoreError::Unavailable(format!("{op} {}: {err}", path.display()))
}

impl BlockStore for FsBlockStore {
    fn put(&self, block: &Block) -> StoreResult<()> {
        let path = self.block_path(block.cid());
        if path.exists() {
            return Ok(());
        }
        let shard = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(shard).map_err(|e| unavailable("create shard", shard, e))?;

        let mut tmp = NamedTempFile::new_in(shard).map_err(|e| unavailable("create temp", shard, e))?;
        tmp.write_all(block.data())
            .and_then(|_| tmp.flush())
            .map_err(|e| unavailable("write", tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| unavailable("persist", &path, e.error))?;

        tracing::trace!(cid = %block.cid().short_hex(), size = block.len(), "stored block");
        Ok(())
    }

    fn get(&self, cid: &Cid) -> StoreResult<Block> {
        let path = self.block_path(cid);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(*cid)),
            Err(e) => return Err(unavailable("read", &path, e)),
        };
        let computed = ContentHasher::BLOCK.cid(&data);
        if computed != *cid {
            return Err(StoreError::HashMismatch {
                cid: *cid,
                computed,
            });
        }
        Ok(Block::with_cid(*cid, data))
    }

    fn has(&self, cid: &Cid) -> StoreResult<bool> {
        let path = self.block_path(cid);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable("stat", &path, e)),
        }
    }

    fn delete(&self, cid: &Cid) -> StoreResult<bool> {
        let path = self.block_path(cid);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable("delete", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn put_get_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path().join("blocks")).unwrap();
        let block = Block::new(b"on disk".to_vec());

        store.put(&block).unwrap();
        assert!(store.has(block.cid()).unwrap());
        assert_eq!(store.get(block.cid()).unwrap(), block);

        let hex = block.cid().to_hex();
        assert!(store.root().join(&hex[..2]).join(&hex).is_file());
    }

    #[test]
    fn reopen_sees_existing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let block = Block::new(b"persist".to_vec());
        FsBlockStore::open(dir.path()).unwrap().put(&block).unwrap();

        let reopened = FsBlockStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(block.cid()).unwrap(), block);
    }

    #[test]
    fn missing_block_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path()).unwrap();
        let cid = *Block::new(b"nope".to_vec()).cid();
        assert!(store.get(&cid).unwrap_err().is_not_found());
        assert!(!store.has(&cid).unwrap());
        assert!(!store.delete(&cid).unwrap());
    }

    #[test]
    fn corrupted_block_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path()).unwrap();
        let block = Block::new(b"original".to_vec());
        store.put(&block).unwrap();

        let hex = block.cid().to_hex();
        std::fs::write(dir.path().join(&hex[..2]).join(&hex), b"tampered").unwrap();

        let err = store.get(block.cid()).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }

    #[test]
    fn repeated_put_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::open(dir.path()).unwrap();
        let block = Block::new(b"twice".to_vec());
        store.put(&block).unwrap();
        store.put(&block).unwrap();
        assert!(store.delete(block.cid()).unwrap());
        assert!(!store.has(block.cid()).unwrap());
    }

    #[test]
    fn concurrent_puts_of_same_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlockStore::open(dir.path()).unwrap());
        let block = Block::new(vec![9u8; 64 * 1024]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let block = block.clone();
                std::thread::spawn(move || {
                    store.put(&block).unwrap();
                    assert_eq!(store.get(block.cid()).unwrap(), block);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
