//! Canopy wire format: the physical layout of a block.
//!
//! Every block has the same shape:
//!
//!   [link_count: u16 LE][link_count × 32-byte BlockId][data]
//!
//! The root block of a blob additionally starts its data with a 4-byte
//! little-endian length header and a one-byte `DataTag`. The length counts
//! the tag byte plus the payload. Only the root carries the header; every
//! other block is plain data after its links.
//!
//! Prefix types are #[repr(C)] over unaligned zerocopy integers, so parsing
//! them is a bounds check and a copy of a few bytes. There is no unsafe code
//! in this module.

use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crypto::{BlockId, HASH_SIZE};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of one child link: a full content hash.
pub const LINK_SIZE: usize = HASH_SIZE;

/// Bytes reserved at the start of every block for the link count.
pub const BLOCK_PREFIX_SIZE: usize = 2;

/// Bytes of the length header at the start of the root block's data.
pub const LENGTH_PREFIX_SIZE: usize = 4;

// ── Prefixes ──────────────────────────────────────────────────────────────────

/// Leading bytes of every block.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct BlockPrefix {
    /// Number of 32-byte links that follow.
    pub link_count: U16<LittleEndian>,
}

assert_eq_size!(BlockPrefix, [u8; BLOCK_PREFIX_SIZE]);

/// Length header at the start of the root block's data.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct LengthPrefix {
    /// Tag byte plus payload length.
    pub length: U32<LittleEndian>,
}

assert_eq_size!(LengthPrefix, [u8; LENGTH_PREFIX_SIZE]);

// ── Data tags ─────────────────────────────────────────────────────────────────

/// Kind of payload a blob carries. Stored as the byte after the length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DataTag {
    BlockBody = 0x00,
}

impl TryFrom<u8> for DataTag {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DataTag::BlockBody),
            other => Err(FormatError::UnknownTag(other)),
        }
    }
}

impl From<DataTag> for u8 {
    fn from(tag: DataTag) -> u8 {
        tag as u8
    }
}

impl fmt::Display for DataTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataTag::BlockBody => f.write_str("block_body"),
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// A block split into its links and trailing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock<'a> {
    pub links: Vec<BlockId>,
    pub payload: &'a [u8],
}

/// Split raw block bytes into links and data.
pub fn decode_block(raw: &[u8]) -> Result<DecodedBlock<'_>, FormatError> {
    let prefix = BlockPrefix::read_from_prefix(raw).ok_or(FormatError::BlockTooShort(raw.len()))?;
    let link_count = usize::from(prefix.link_count.get());
    let links_end = BLOCK_PREFIX_SIZE + link_count * LINK_SIZE;
    if links_end > raw.len() {
        return Err(FormatError::LinksOverflow {
            links: link_count,
            len: raw.len(),
        });
    }

    let links = raw[BLOCK_PREFIX_SIZE..links_end]
        .chunks_exact(LINK_SIZE)
        .filter_map(BlockId::from_slice)
        .collect();

    Ok(DecodedBlock {
        links,
        payload: &raw[links_end..],
    })
}

/// Build raw block bytes from links and data.
pub fn encode_block(links: &[BlockId], data: &[u8]) -> Result<Vec<u8>, FormatError> {
    let link_count =
        u16::try_from(links.len()).map_err(|_| FormatError::TooManyLinks(links.len()))?;

    let mut raw = Vec::with_capacity(BLOCK_PREFIX_SIZE + links.len() * LINK_SIZE + data.len());
    let prefix = BlockPrefix {
        link_count: U16::new(link_count),
    };
    raw.extend_from_slice(prefix.as_bytes());
    for link in links {
        raw.extend_from_slice(link.as_bytes());
    }
    raw.extend_from_slice(data);
    Ok(raw)
}

/// Read the length header off the root block's data.
///
/// Returns the data after the header (tag byte first) and the declared
/// length of tag plus payload.
pub fn extract_header(payload: &[u8]) -> Result<(&[u8], usize), FormatError> {
    let prefix =
        LengthPrefix::read_from_prefix(payload).ok_or(FormatError::HeaderTruncated(payload.len()))?;
    Ok((&payload[LENGTH_PREFIX_SIZE..], prefix.length.get() as usize))
}

/// Encode the root length header for `length` bytes of tag plus payload.
pub fn length_header(length: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], FormatError> {
    let length = u32::try_from(length).map_err(|_| FormatError::LengthOverflow(length))?;
    let prefix = LengthPrefix {
        length: U32::new(length),
    };
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    header.copy_from_slice(prefix.as_bytes());
    Ok(header)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A block or blob that does not have the shape it claims.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("block of {0} bytes is too short for a link prefix")]
    BlockTooShort(usize),

    #[error("{links} links overrun a block of {len} bytes")]
    LinksOverflow { links: usize, len: usize },

    #[error("{0} links do not fit the u16 link prefix")]
    TooManyLinks(usize),

    #[error("root header truncated: {0} bytes of data")]
    HeaderTruncated(usize),

    #[error("length {0} does not fit the u32 length header")]
    LengthOverflow(usize),

    #[error("root block carries no tag byte")]
    MissingTag,

    #[error("unknown data tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("tag mismatch: 0x{actual:02x} != 0x{expected:02x}")]
    TagMismatch { expected: u8, actual: u8 },

    #[error("no limits configured for tag {0}")]
    UnsupportedTag(DataTag),

    #[error("data is too large: {len} > {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unexpected size for block #{index}: {actual} != {expected}")]
    UnexpectedSize {
        index: usize,
        actual: usize,
        expected: usize,
    },

    #[error("unexpected link count for block #{index}: {actual} != {expected}")]
    UnexpectedLinkCount {
        index: usize,
        actual: usize,
        expected: usize,
    },

    #[error("declared length {declared} but {actual} bytes were reassembled")]
    LengthMismatch { declared: usize, actual: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
