use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::error::{DagError, DagResult};

/// Default maximum leaf payload: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default fan-out of internal file nodes.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// Hard ceiling on any encoded block, including protocol framing headroom.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Default encoded size above which a directory is split into shards.
pub const DEFAULT_MAX_DIR_BYTES: usize = 256 * 1024;

const MIN_DIR_BYTES: usize = 256;

/// Layout parameters for the DAG builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Maximum bytes of file content per leaf.
    pub chunk_size: usize,
    /// Maximum children per internal file node.
    pub max_links: usize,
    /// Largest encoded directory node before it is split into shards.
    pub max_dir_bytes: usize,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_links: DEFAULT_MAX_LINKS,
            max_dir_bytes: DEFAULT_MAX_DIR_BYTES,
        }
    }
}

impl DagConfig {
    pub fn validate(&self) -> DagResult<()> {
        if self.chunk_size == 0 || self.chunk_size >= MAX_BLOCK_SIZE {
            return Err(DagError::InvalidConfig(format!(
                "chunk_size must be in 1..{MAX_BLOCK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.max_links < 2 {
            return Err(DagError::InvalidConfig(format!(
                "max_links must be at least 2, got {}",
                self.max_links
            )));
        }
        if !(MIN_DIR_BYTES..=MAX_BLOCK_SIZE / 2).contains(&self.max_dir_bytes) {
            return Err(DagError::InvalidConfig(format!(
                "max_dir_bytes must be in {MIN_DIR_BYTES}..={}, got {}",
                MAX_BLOCK_SIZE / 2,
                self.max_dir_bytes
            )));
        }
        Ok(())
    }
}

/// Splits byte streams at fixed offsets.
///
/// Boundaries depend only on position, so the same bytes always produce the
/// same chunks.
#[derive(Clone, Copy, Debug)]
pub struct FixedSizeChunker {
    size: usize,
}

impl FixedSizeChunker {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Chunks of an in-memory buffer. An empty buffer yields nothing.
    pub fn chunks<'a>(&self, data: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        data.chunks(self.size)
    }

    /// Read the next full chunk from `reader`.
    ///
    /// Short reads are retried until the chunk is full or the reader hits
    /// EOF. Returns an empty vector at EOF.
    pub fn next_chunk<R: Read>(&self, reader: &mut R) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size];
        let mut filled = 0;
        while filled < self.size {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
