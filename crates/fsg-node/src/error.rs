use std::net::SocketAddr;
use std::path::PathBuf;

use fsg_dag::DagError;
use fsg_exchange::ExchangeError;
use fsg_store::StoreError;

/// Errors surfaced by a running node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("runtime not ready: {0}")]
    Runtime(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl NodeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
