use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Multibase-style prefix of the textual CID form (`f` = lowercase base16).
pub const CID_PREFIX: char = 'f';

const DIGEST_LEN: usize = 32;

/// Content identifier for a block.
///
/// A `Cid` is the 32-byte BLAKE3 digest of a block's encoded bytes. Two
/// blocks with equal CIDs are treated as identical content. The textual form
/// is `f` followed by 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid([u8; DIGEST_LEN]);

impl Cid {
    /// Wrap a pre-computed digest.
    pub const fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex-encoded digest without the multibase prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters), for logs.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex digest, with or without the `f` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let digits = if s.len() == DIGEST_LEN * 2 + 1 {
            s.strip_prefix(CID_PREFIX).ok_or_else(|| TypeError::InvalidCid {
                input: s.to_string(),
                reason: format!("expected '{CID_PREFIX}' prefix"),
            })?
        } else {
            s
        };
        let bytes = hex::decode(digits).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != DIGEST_LEN {
            return Err(TypeError::InvalidLength {
                expected: DIGEST_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; DIGEST_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.short_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CID_PREFIX}{}", self.to_hex())
    }
}

impl FromStr for Cid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; DIGEST_LEN]> for Cid {
    fn from(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }
}

/// Extract a CID from user input such as `/ipfs/<cid>` or `<cid>\n`.
///
/// Everything up to the last `/` is discarded, then surrounding spaces and
/// line breaks are trimmed.
pub fn parse_cid_path(input: &str) -> Result<Cid, TypeError> {
    let tail = match input.rfind('/') {
        Some(pos) => &input[pos + 1..],
        None => input,
    };
    let trimmed = tail.trim_matches(|c| c == ' ' || c == '\r' || c == '\n');
    if trimmed.is_empty() {
        return Err(TypeError::InvalidCid {
            input: input.to_string(),
            reason: "empty".into(),
        });
    }
    trimmed.parse()
}
