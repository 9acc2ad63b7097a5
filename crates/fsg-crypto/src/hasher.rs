use fsg_types::Cid;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so the same bytes hashed for different purposes produce
/// different digests.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for block content (produces CIDs).
    pub const BLOCK: Self = Self {
        domain: "fsg-block-v1",
    };
    /// Hasher for DHT keys derived from CIDs and peer ids.
    pub const DHT_KEY: Self = Self {
        domain: "fsg-dht-key-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn digest(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hash raw bytes into a content identifier.
    pub fn cid(&self, data: &[u8]) -> Cid {
        Cid::from_digest(self.digest(data))
    }

    /// Verify that data produces the expected CID.
    pub fn verify(&self, data: &[u8], expected: &Cid) -> bool {
        self.cid(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
