//! Wire protocol for fsg.
//!
//! A session between two peers carries one stream of framed messages in
//! each direction. Block exchange uses `Want`, `Cancel` and `Block`;
//! provider discovery uses `Request`/`Response` pairs matched by id.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::FsgCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{DhtRequest, DhtResponse, FsgMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
