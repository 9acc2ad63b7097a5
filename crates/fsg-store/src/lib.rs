//! Content-addressed block storage for fsg.
//!
//! A block store maps a block's [`Cid`](fsg_types::Cid) to its raw bytes.
//! The store never interprets block contents; DAG structure lives in
//! `fsg-dag`.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlockStore`] trait:
//!
//! - [`InMemoryBlockStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsBlockStore`] -- one file per block under a sharded directory tree
//!
//! # Design Rules
//!
//! 1. Blocks are immutable once written (content addressing guarantees this).
//! 2. `put` is idempotent: storing a present block is a no-op success.
//! 3. A reader never observes a partially written block.
//! 4. `NotFound` is distinct from `Unavailable` so callers can tell
//!    "ask the network" apart from "storage broken".

pub mod block;
pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use block::Block;
pub use error::{StoreError, StoreResult};
pub use fs::FsBlockStore;
pub use memory::InMemoryBlockStore;
pub use traits::BlockStore;
