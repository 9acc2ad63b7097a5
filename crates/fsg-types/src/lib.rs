//! Foundation types for fsg.
//!
//! Every other fsg crate depends on `fsg-types`.
//!
//! # Key Types
//!
//! - [`Cid`]: content identifier of a block (BLAKE3 digest of its bytes)
//! - [`PeerId`]: stable peer identity derived from an [`IdentityCredential`]
//! - [`PeerInfo`]: a peer identity paired with its dialable address

pub mod cid;
pub mod error;
pub mod peer;

pub use cid::{parse_cid_path, Cid, CID_PREFIX};
pub use error::TypeError;
pub use peer::{IdentityCredential, PeerId, PeerInfo};
