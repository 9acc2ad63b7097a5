//! Chunking and Merkle-DAG layout for fsg.
//!
//! Files are split into fixed-size chunks stored as leaf blocks. When a file
//! spans several chunks, internal `File` nodes list the ordered child links
//! with their content sizes, stacking extra levels whenever a node would
//! exceed the configured fan-out. Directories are `Directory` nodes mapping
//! names to child roots, sorted by name so the same tree always hashes to the
//! same root. A directory too large for one block is split into name-ordered
//! shards under a `ShardedDirectory` node.
//!
//! [`DagBuilder`] writes every block it produces into a
//! [`BlockStore`](fsg_store::BlockStore); [`DagReader`] walks a DAG back out
//! of one.

pub mod builder;
pub mod chunker;
pub mod error;
pub mod node;
pub mod reader;

pub use builder::DagBuilder;
pub use chunker::{
    DagConfig, FixedSizeChunker, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_DIR_BYTES, DEFAULT_MAX_LINKS,
    MAX_BLOCK_SIZE,
};
pub use error::{DagError, DagResult};
pub use node::{check_name, DagNode, DirEntry, EntryKind, Link, Shard};
pub use reader::DagReader;
