//! Breadth-first numbering of block positions.
//!
//! Positions are numbered level by level, left to right, in a complete tree
//! whose interior blocks carry up to `links_per_block` links. Position 0 is
//! the root. The children of any position form a contiguous run, so the
//! i-th link of a block always lands at `first_child_id(ix) + i`.

use crate::schema::MaxBlockSize;

/// Position of a block within one root's tree.
pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthIndices {
    links_per_block: usize,
}

/// Where a position sits: its depth, the first position of that level,
/// and how many positions the level holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Level {
    depth: usize,
    start: NodeIndex,
    width: usize,
}

impl DepthIndices {
    pub fn new(links_per_block: usize) -> Self {
        Self {
            links_per_block: links_per_block.max(1),
        }
    }

    /// Layout matching the link width of blocks of at most `max` bytes.
    pub fn for_block_size(max: MaxBlockSize) -> Self {
        Self::new(max.links_per_block())
    }

    pub fn links_per_block(&self) -> usize {
        self.links_per_block
    }

    /// Depth of a position; the root is at depth 0.
    pub fn depth(&self, ix: NodeIndex) -> usize {
        self.level(ix).depth
    }

    /// Position of the first child of `ix`.
    pub fn first_child_id(&self, ix: NodeIndex) -> NodeIndex {
        let level = self.level(ix);
        let next_start = level.start.saturating_add(level.width);
        next_start.saturating_add((ix - level.start).saturating_mul(self.links_per_block))
    }

    fn level(&self, ix: NodeIndex) -> Level {
        // A single-link tree is a chain: one position per level.
        if self.links_per_block == 1 {
            return Level {
                depth: ix,
                start: ix,
                width: 1,
            };
        }

        let mut level = Level {
            depth: 0,
            start: 0,
            width: 1,
        };
        while ix - level.start >= level.width {
            level.start += level.width;
            level.width = level.width.saturating_mul(self.links_per_block);
            level.depth += 1;
        }
        level
    }
}
