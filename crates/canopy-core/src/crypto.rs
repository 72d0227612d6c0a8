//! Content addressing for Canopy.
//!
//! Every block is named by the BLAKE3 hash of its raw bytes. A link inside
//! a block is exactly one such hash, so the digest length doubles as the
//! link width of the wire format.

use std::fmt;

/// Length of a BLAKE3 digest in bytes.
pub const HASH_SIZE: usize = 32;

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}

/// Content hash of a block.
///
/// Two blocks with the same bytes have the same id, which is what lets
/// downloads of different roots share the blocks they have in common.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId([u8; HASH_SIZE]);

/// A `BlockId` used as the handle of one download.
pub type RootId = BlockId;

impl BlockId {
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Id of the given block bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(hash(data))
    }

    /// Read an id from a slice of exactly `HASH_SIZE` bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; HASH_SIZE]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// True if `data` hashes to this id.
    pub fn matches(&self, data: &[u8]) -> bool {
        hash(data) == self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", hex::encode(&self.0[..8]))
    }
}
