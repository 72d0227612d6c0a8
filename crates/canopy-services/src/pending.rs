//! Pending index: which in-flight roots are waiting for which blocks.
//!
//! The same block may sit at several positions of one tree (identical
//! subtrees) and in several trees at once, so every entry maps each
//! interested root to the positions it expects the block at.

use std::collections::HashMap;

use canopy_core::{BlockId, NodeIndex, RootId};

/// Positions a block is awaited at, per interested root.
pub type Awaiting = HashMap<RootId, Vec<NodeIndex>>;

#[derive(Debug, Default)]
pub struct PendingIndex {
    entries: HashMap<BlockId, Awaiting>,
}

impl PendingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.entries.contains_key(id)
    }

    /// Record that `root` expects `id` at position `ix`.
    pub fn insert(&mut self, id: BlockId, root: RootId, ix: NodeIndex) {
        self.entries
            .entry(id)
            .or_default()
            .entry(root)
            .or_default()
            .push(ix);
    }

    /// Remove and return everything waiting on `id`.
    pub fn take(&mut self, id: &BlockId) -> Option<Awaiting> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&Awaiting> {
        self.entries.get(id)
    }

    /// Drop `root` from the entries of `blocks`, deleting entries nobody
    /// else waits on.
    pub fn remove_root<'a>(&mut self, root: &RootId, blocks: impl IntoIterator<Item = &'a BlockId>) {
        for id in blocks {
            if let Some(awaiting) = self.entries.get_mut(id) {
                awaiting.remove(root);
                if awaiting.is_empty() {
                    self.entries.remove(id);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
