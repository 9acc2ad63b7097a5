use bytes::{BufMut, Bytes, BytesMut};
use fsg_store::Block;
use fsg_types::Cid;
use serde::{Deserialize, Serialize};

use crate::chunker::MAX_BLOCK_SIZE;
use crate::error::{DagError, DagResult};

const TAG_LEAF: u8 = 0x00;
const TAG_FILE: u8 = 0x01;
const TAG_DIRECTORY: u8 = 0x02;
const TAG_SHARDED_DIRECTORY: u8 = 0x03;

/// A child reference inside a file node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub cid: Cid,
    /// File content bytes reachable through this link.
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// A named child of a directory node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub cid: Cid,
    pub size: u64,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, cid: Cid, size: u64, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            cid,
            size,
            kind,
        }
    }
}

/// One name-ordered slice of a sharded directory.
///
/// Covers every entry from `first` up to the next shard's `first`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub first: String,
    pub cid: Cid,
    pub size: u64,
}

/// Sum sizes, or `None` if they overflow `u64`.
pub(crate) fn checked_total(sizes: impl IntoIterator<Item = u64>) -> Option<u64> {
    sizes.into_iter().try_fold(0u64, u64::checked_add)
}

/// Reject names that are empty, `.`/`..`, or contain a path separator.
///
/// Names come from remote peers, so this also guards materialization
/// against escaping the output directory.
pub fn check_name(name: &str) -> DagResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(DagError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Decoded payload of a DAG block.
///
/// Wire layout is one tag byte followed by the body: raw bytes for a leaf,
/// bincode for the internal node kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagNode {
    /// Raw file bytes.
    Leaf(Bytes),
    /// Ordered children whose content concatenates to the file.
    File { total_size: u64, links: Vec<Link> },
    /// Entries sorted by name.
    Directory { entries: Vec<DirEntry> },
    /// A directory too large for one block. Each shard points at a
    /// `Directory` or another `ShardedDirectory`.
    ShardedDirectory { shards: Vec<Shard> },
}

#[derive(Serialize, Deserialize)]
struct FileBody {
    total_size: u64,
    links: Vec<Link>,
}

#[derive(Serialize, Deserialize)]
struct DirectoryBody {
    entries: Vec<DirEntry>,
}

#[derive(Serialize, Deserialize)]
struct ShardedDirectoryBody {
    shards: Vec<Shard>,
}

impl DagNode {
    pub fn encode(&self) -> DagResult<Bytes> {
        let encoded = match self {
            DagNode::Leaf(data) => {
                let mut buf = BytesMut::with_capacity(1 + data.len());
                buf.put_u8(TAG_LEAF);
                buf.put_slice(data);
                buf.freeze()
            }
            DagNode::File { total_size, links } => tagged(
                TAG_FILE,
                &FileBody {
                    total_size: *total_size,
                    links: links.clone(),
                },
            )?,
            DagNode::Directory { entries } => tagged(
                TAG_DIRECTORY,
                &DirectoryBody {
                    entries: entries.clone(),
                },
            )?,
            DagNode::ShardedDirectory { shards } => tagged(
                TAG_SHARDED_DIRECTORY,
                &ShardedDirectoryBody {
                    shards: shards.clone(),
                },
            )?,
        };
        if encoded.len() > MAX_BLOCK_SIZE {
            return Err(DagError::SizeLimitExceeded {
                size: encoded.len(),
                limit: MAX_BLOCK_SIZE,
            });
        }
        Ok(encoded)
    }

    /// Encode and hash into a storable block.
    pub fn to_block(&self) -> DagResult<Block> {
        Ok(Block::new(self.encode()?))
    }

    pub fn decode(block: &Block) -> DagResult<Self> {
        let malformed = |reason: String| DagError::Malformed {
            cid: *block.cid(),
            reason,
        };
        let data = block.data();
        let Some(&tag) = data.first() else {
            return Err(malformed("empty block".into()));
        };
        match tag {
            TAG_LEAF => Ok(DagNode::Leaf(data.slice(1..))),
            TAG_FILE => {
                let body: FileBody =
                    bincode::deserialize(&data[1..]).map_err(|e| malformed(e.to_string()))?;
                let sum = checked_total(body.links.iter().map(|l| l.size))
                    .ok_or_else(|| malformed("link sizes overflow".into()))?;
                if body.links.is_empty() || sum != body.total_size {
                    return Err(malformed(format!(
                        "file node size {} does not match links ({sum})",
                        body.total_size
                    )));
                }
                Ok(DagNode::File {
                    total_size: body.total_size,
                    links: body.links,
                })
            }
            TAG_DIRECTORY => {
                let body: DirectoryBody =
                    bincode::deserialize(&data[1..]).map_err(|e| malformed(e.to_string()))?;
                checked_total(body.entries.iter().map(|e| e.size))
                    .ok_or_else(|| malformed("entry sizes overflow".into()))?;
                Ok(DagNode::Directory {
                    entries: body.entries,
                })
            }
            TAG_SHARDED_DIRECTORY => {
                let body: ShardedDirectoryBody =
                    bincode::deserialize(&data[1..]).map_err(|e| malformed(e.to_string()))?;
                if body.shards.is_empty() {
                    return Err(malformed("sharded directory without shards".into()));
                }
                if body.shards.windows(2).any(|w| w[0].first >= w[1].first) {
                    return Err(malformed("shards out of name order".into()));
                }
                checked_total(body.shards.iter().map(|s| s.size))
                    .ok_or_else(|| malformed("shard sizes overflow".into()))?;
                Ok(DagNode::ShardedDirectory {
                    shards: body.shards,
                })
            }
            other => Err(malformed(format!("unknown node tag {other:#04x}"))),
        }
    }

    /// CIDs this node points to, in order.
    pub fn links(&self) -> Vec<Cid> {
        match self {
            DagNode::Leaf(_) => Vec::new(),
            DagNode::File { links, .. } => links.iter().map(|l| l.cid).collect(),
            DagNode::Directory { entries } => entries.iter().map(|e| e.cid).collect(),
            DagNode::ShardedDirectory { shards } => shards.iter().map(|s| s.cid).collect(),
        }
    }

    /// Content bytes represented by the subtree rooted here.
    ///
    /// Saturates for hand-built nodes whose sizes overflow; decoded nodes
    /// have already been checked.
    pub fn content_size(&self) -> u64 {
        let total = match self {
            DagNode::Leaf(data) => Some(data.len() as u64),
            DagNode::File { total_size, .. } => Some(*total_size),
            DagNode::Directory { entries } => checked_total(entries.iter().map(|e| e.size)),
            DagNode::ShardedDirectory { shards } => checked_total(shards.iter().map(|s| s.size)),
        };
        total.unwrap_or(u64::MAX)
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            DagNode::Directory { .. } | DagNode::ShardedDirectory { .. } => EntryKind::Directory,
            _ => EntryKind::File,
        }
    }
}

fn tagged<T: Serialize>(tag: u8, body: &T) -> DagResult<Bytes> {
    let payload = bincode::serialize(body).map_err(|e| DagError::Encode(e.to_string()))?;
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(tag);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}
