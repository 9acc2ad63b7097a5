use fsg_types::{Cid, PeerInfo};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload accepted in one frame. Fits a maximum-size block plus
/// envelope.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// All message types exchanged on a peer session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsgMessage {
    /// First message in each direction.
    Hello {
        version: u32,
        peer: PeerInfo,
        /// Whether the sender answers DHT requests.
        dht_server: bool,
    },
    /// Blocks the sender needs.
    Want { cids: Vec<Cid> },
    /// Blocks the sender no longer needs.
    Cancel { cids: Vec<Cid> },
    Block { cid: Cid, data: Vec<u8> },
    Request { id: u64, body: DhtRequest },
    Response { id: u64, body: DhtResponse },
    Error { code: u32, message: String },
}

/// DHT queries. Keys are 32-byte points in the XOR keyspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhtRequest {
    Ping,
    FindNode { target: [u8; 32] },
    GetProviders { key: [u8; 32] },
    AddProvider { key: [u8; 32], provider: PeerInfo },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhtResponse {
    Pong,
    Nodes { peers: Vec<PeerInfo> },
    Providers {
        providers: Vec<PeerInfo>,
        closer: Vec<PeerInfo>,
    },
    Ack,
    Error { message: String },
}

impl FsgMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Hello { .. } => 1,
            Self::Want { .. } => 2,
            Self::Cancel { .. } => 3,
            Self::Block { .. } => 4,
            Self::Request { .. } => 5,
            Self::Response { .. } => 6,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Want { .. } => "Want",
            Self::Cancel { .. } => "Cancel",
            Self::Block { .. } => "Block",
            Self::Request { .. } => "Request",
            Self::Response { .. } => "Response",
            Self::Error { .. } => "Error",
        }
    }
}

impl DhtRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::FindNode { .. } => "FindNode",
            Self::GetProviders { .. } => "GetProviders",
            Self::AddProvider { .. } => "AddProvider",
        }
    }
}
