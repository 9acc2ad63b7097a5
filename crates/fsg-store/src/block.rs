use bytes::Bytes;
use fsg_crypto::ContentHasher;
use fsg_types::Cid;

/// An immutable block of bytes identified by its content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Create a block from raw bytes, computing its CID.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = ContentHasher::BLOCK.cid(&data);
        Self { cid, data }
    }

    /// Pair bytes with a claimed CID without hashing.
    ///
    /// Used for bytes received from the network; call [`Block::verify`]
    /// before trusting them.
    pub fn with_cid(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if the bytes hash to the claimed CID.
    pub fn verify(&self) -> bool {
        ContentHasher::BLOCK.verify(&self.data, &self.cid)
    }
}
