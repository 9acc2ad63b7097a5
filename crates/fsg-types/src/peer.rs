use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identity credential supplied to a node.
///
/// The node never interprets the bytes; it only derives its [`PeerId`] from
/// them. Key generation and signing are handled elsewhere.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCredential(Vec<u8>);

impl IdentityCredential {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Generate a random 32-byte credential for an ephemeral node.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredential")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Stable identity of a peer in the overlay.
///
/// Derived deterministically from an [`IdentityCredential`] with BLAKE3, so
/// the same credential always yields the same `PeerId`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Derive a `PeerId` from an identity credential.
    pub fn derive(credential: &IdentityCredential) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fsg-peer-v1:");
        hasher.update(credential.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Random peer id for tests and throwaway nodes.
    pub fn random() -> Self {
        Self::derive(&IdentityCredential::generate())
    }

    /// Create from raw bytes. Use `derive()` for production code.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("peer:{}", hex::encode(&self.0[..4]))
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("peer:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short_id())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

/// A peer identity and the address it accepts sessions on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
}

impl PeerInfo {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let cred = IdentityCredential::new(vec![7; 32]);
        assert_eq!(PeerId::derive(&cred), PeerId::derive(&cred));
    }

    #[test]
    fn different_credentials_differ() {
        let a = PeerId::derive(&IdentityCredential::new(vec![1]));
        let b = PeerId::derive(&IdentityCredential::new(vec![2]));
        assert_ne!(a, b);
    }

    #[test]
    fn generated_credentials_are_random() {
        assert_ne!(IdentityCredential::generate(), IdentityCredential::generate());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = IdentityCredential::new(vec![42; 4]);
        let debug = format!("{cred:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("42"));
    }

    #[test]
    fn hex_roundtrip_accepts_short_prefix() {
        let id = PeerId::random();
        assert_eq!(PeerId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(PeerId::from_hex(&format!("peer:{}", id.to_hex())).unwrap(), id);
    }

    #[test]
    fn peer_info_display() {
        let id = PeerId::from_raw([0xab; 32]);
        let info = PeerInfo::new(id, "127.0.0.1:4001".parse().unwrap());
        assert_eq!(info.to_string(), "peer:abababab@127.0.0.1:4001");
    }
}
