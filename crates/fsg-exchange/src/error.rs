use fsg_dag::DagError;
use fsg_protocol::ProtocolError;
use fsg_store::StoreError;
use fsg_types::{Cid, PeerId};

/// Errors from sessions and fetches.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No provider was found for the root after every lookup attempt.
    #[error("content unavailable: no providers found for {cid}")]
    NoProvidersFound { cid: Cid },

    /// The deadline passed with blocks still missing.
    #[error("fetch of {cid} timed out: {received} blocks received, {outstanding} outstanding")]
    FetchTimeout {
        cid: Cid,
        received: usize,
        outstanding: usize,
    },

    /// The fetch was cancelled by shutdown.
    #[error("fetch of {cid} cancelled")]
    Cancelled { cid: Cid },

    /// A session failed or is already closed. Recoverable: only that
    /// session is dropped.
    #[error("session with {peer} failed: {reason}")]
    Session { peer: PeerId, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("DHT request to {peer} timed out")]
    RequestTimeout { peer: PeerId },

    /// A received block does not hash to its CID.
    #[error("block {cid} failed verification")]
    InvalidBlock { cid: Cid },

    /// The session manager is shutting down and takes no new sessions.
    #[error("session manager is shut down")]
    ShutDown,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dag(#[from] DagError),
}

impl ExchangeError {
    /// Session-scoped errors that never abort a fetch.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::Session { .. } | Self::Handshake(_) | Self::RequestTimeout { .. } | Self::Protocol(_)
        )
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
