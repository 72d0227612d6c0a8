//! Block schemas: the expected shape of every block in a blob's tree.
//!
//! A blob of `T` data bytes is spread over `n` blocks. Every block except
//! the last is exactly `max_block_size` bytes; the last one holds whatever
//! data is left. Links are packed into the lowest positions: the first
//! `full_link_blocks` positions carry `links_per_block` links each, the next
//! one carries the remainder, and everything after that is a leaf.
//!
//! Because a block's shape is fully determined by its position and the
//! declared length in the root header, a downloader can reject a block the
//! moment it arrives, without waiting for the rest of the tree.

use crate::layout::{DepthIndices, NodeIndex};
use crate::wire::{FormatError, BLOCK_PREFIX_SIZE, LENGTH_PREFIX_SIZE, LINK_SIZE};

/// True if blocks of `max_block_size` bytes can hold a blob.
///
/// The root must keep at least 5 data bytes (length header plus tag) even
/// when it is fully occupied by links, after the 2-byte link count prefix.
/// All multiples of 32 from 64 upwards are valid.
pub fn is_valid_max_block_size(max_block_size: usize) -> bool {
    max_block_size >= 7 + LINK_SIZE && (max_block_size - BLOCK_PREFIX_SIZE) % LINK_SIZE >= 5
}

/// A maximum physical block size that passed `is_valid_max_block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaxBlockSize(usize);

impl MaxBlockSize {
    pub fn new(max_block_size: usize) -> Option<Self> {
        is_valid_max_block_size(max_block_size).then_some(Self(max_block_size))
    }

    pub fn get(&self) -> usize {
        self.0
    }

    /// Links that fit in a block with no room left for data.
    pub fn links_per_block(&self) -> usize {
        (self.0 - BLOCK_PREFIX_SIZE) / LINK_SIZE
    }
}

/// Expected size and link count of every position in one blob's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSchema {
    max_block_size: usize,
    links_per_block: usize,
    data_length: usize,
    total_blocks: usize,
    full_link_blocks: usize,
    last_link_block_links: usize,
    last_block_data_size: usize,
}

impl BlockSchema {
    /// Lay out `data_length` bytes in blocks of at most `max` bytes.
    pub fn new(max: MaxBlockSize, data_length: usize) -> Self {
        let max_block_size = max.get();
        let links_per_block = max.links_per_block();
        let leaf_capacity = max_block_size - BLOCK_PREFIX_SIZE;
        // Every block past the first adds a full leaf and costs its parent one link.
        let extra_capacity = leaf_capacity - LINK_SIZE;

        let total_blocks = if data_length <= leaf_capacity {
            1
        } else {
            1 + (data_length - leaf_capacity).div_ceil(extra_capacity)
        };
        let links = total_blocks - 1;

        Self {
            max_block_size,
            links_per_block,
            data_length,
            total_blocks,
            full_link_blocks: links / links_per_block,
            last_link_block_links: links % links_per_block,
            last_block_data_size: data_length - links * extra_capacity,
        }
    }

    /// Schema for a blob whose root header declares `declared_length`
    /// bytes of tag plus payload. The header itself is laid out too.
    pub fn length_prefixed(max: MaxBlockSize, declared_length: usize) -> Self {
        Self::new(max, declared_length.saturating_add(LENGTH_PREFIX_SIZE))
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Data bytes spread over the tree, length header included.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Positions fully occupied by links.
    pub fn full_link_blocks(&self) -> usize {
        self.full_link_blocks
    }

    pub fn total_links(&self) -> usize {
        self.full_link_blocks * self.links_per_block + self.last_link_block_links
    }

    /// Depth of the deepest position.
    pub fn depth(&self) -> usize {
        DepthIndices::new(self.links_per_block).depth(self.total_blocks - 1)
    }

    /// Number of links the block at `ix` must carry.
    pub fn link_count(&self, ix: NodeIndex) -> usize {
        if ix < self.full_link_blocks {
            self.links_per_block
        } else if ix == self.full_link_blocks && ix < self.total_blocks {
            self.last_link_block_links
        } else {
            0
        }
    }

    /// Data bytes the block at `ix` must carry.
    pub fn data_size(&self, ix: NodeIndex) -> usize {
        if ix >= self.total_blocks {
            0
        } else if ix == self.total_blocks - 1 {
            self.last_block_data_size
        } else {
            self.max_block_size - BLOCK_PREFIX_SIZE - self.link_count(ix) * LINK_SIZE
        }
    }

    /// Physical size of the block at `ix`. Positions outside the tree
    /// expect size 0, so no real block can match them.
    pub fn block_size(&self, ix: NodeIndex) -> usize {
        if ix >= self.total_blocks {
            0
        } else {
            BLOCK_PREFIX_SIZE + self.link_count(ix) * LINK_SIZE + self.data_size(ix)
        }
    }

    /// Check a block of `size` bytes with `links` links against position `ix`.
    pub fn check(&self, ix: NodeIndex, size: usize, links: usize) -> Result<(), FormatError> {
        let expected = self.block_size(ix);
        if size != expected {
            return Err(FormatError::UnexpectedSize {
                index: ix,
                actual: size,
                expected,
            });
        }
        let expected = self.link_count(ix);
        if links != expected {
            return Err(FormatError::UnexpectedLinkCount {
                index: ix,
                actual: links,
                expected,
            });
        }
        Ok(())
    }
}
