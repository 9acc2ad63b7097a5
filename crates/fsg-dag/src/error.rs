//! Error types for DAG building and reading.

use std::path::PathBuf;

use fsg_store::StoreError;
use fsg_types::Cid;

/// Errors that can occur while building or walking a DAG.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Input could not be read, or output could not be written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An encoded node would be larger than the maximum block size.
    #[error("block of {size} bytes exceeds the {limit} byte limit")]
    SizeLimitExceeded { size: usize, limit: usize },

    /// A block does not decode as a DAG node.
    #[error("malformed node {cid}: {reason}")]
    Malformed { cid: Cid, reason: String },

    /// The node is a directory where a file was expected.
    #[error("{0} is a directory, not a file")]
    NotAFile(Cid),

    /// Directory entry names must be unique and path-safe.
    #[error("invalid directory entry name {0:?}")]
    InvalidName(String),

    /// Child sizes add up to more than `u64::MAX`.
    #[error("content sizes overflow u64")]
    SizeOverflow,

    /// A node failed to serialize.
    #[error("encoding error: {0}")]
    Encode(String),

    /// Configuration values are out of range.
    #[error("invalid DAG config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DagError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the error means a block is simply not held locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// Convenience alias for DAG results.
pub type DagResult<T> = Result<T, DagError>;
