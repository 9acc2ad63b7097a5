use std::fmt;

use fsg_crypto::ContentHasher;
use fsg_types::{Cid, PeerId};

/// A point in the 256-bit XOR keyspace.
///
/// Both CIDs and peer ids are hashed into the keyspace under the DHT key
/// domain, so neither can be chosen to land next to the other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key([u8; 32]);

impl Key {
    pub const BITS: usize = 256;

    pub fn for_cid(cid: &Cid) -> Self {
        Self(ContentHasher::DHT_KEY.digest(cid.as_bytes()))
    }

    pub fn for_peer(peer: &PeerId) -> Self {
        Self(ContentHasher::DHT_KEY.digest(peer.as_bytes()))
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance. Ordering of the result orders peers by closeness.
    pub fn distance(&self, other: &Key) -> Key {
        let mut result = [0u8; 32];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Key(result)
    }

    pub fn leading_zeros(&self) -> usize {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros() as usize;
                break;
            }
        }
        count
    }

    /// Bucket for `self` relative to `local`, or `None` if they are equal.
    pub fn bucket_index(&self, local: &Key) -> Option<usize> {
        let leading = self.distance(local).leading_zeros();
        if leading == Self::BITS {
            None
        } else {
            Some(Self::BITS - 1 - leading)
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex_prefix(&self.0))
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..4].iter().map(|b| format!("{b:02x}")).collect()
}
