use fsg_types::Cid;

/// Errors from block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested block is not held locally.
    #[error("block not found: {0}")]
    NotFound(Cid),

    /// The backing storage failed (I/O error, poisoned lock, ...).
    #[error("block store unavailable: {0}")]
    Unavailable(String),

    /// Stored bytes no longer hash to their CID (data corruption).
    #[error("hash mismatch for {cid}: stored bytes hash to {computed}")]
    HashMismatch { cid: Cid, computed: Cid },
}

impl StoreError {
    /// Returns `true` for the recoverable "not held locally" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
