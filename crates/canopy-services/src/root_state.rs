//! Per-root download bookkeeping.

use std::collections::HashSet;

use canopy_core::{BlockId, BlockSchema, DataTag, RootId};

use crate::session::SessionHandle;

/// Where a root's download stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootPhase {
    /// Only the root position is outstanding; its shape is unknown.
    Requested,
    /// The root header was validated and the tree's shape is known.
    Expanding(BlockSchema),
}

/// State of one in-flight root. Exists exactly as long as the download does.
#[derive(Debug)]
pub struct RootDownloadState {
    root: RootId,
    tag: DataTag,
    session: SessionHandle,
    phase: RootPhase,
    /// Every block id this root has asked for, itself included.
    descendants: HashSet<BlockId>,
    /// Positions not yet resolved.
    outstanding: usize,
}

impl RootDownloadState {
    pub fn new(root: RootId, tag: DataTag, session: SessionHandle) -> Self {
        Self {
            root,
            tag,
            session,
            phase: RootPhase::Requested,
            descendants: HashSet::from([root]),
            outstanding: 1,
        }
    }

    pub fn root(&self) -> &RootId {
        &self.root
    }

    pub fn tag(&self) -> DataTag {
        self.tag
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn phase(&self) -> &RootPhase {
        &self.phase
    }

    pub fn schema(&self) -> Option<&BlockSchema> {
        match &self.phase {
            RootPhase::Requested => None,
            RootPhase::Expanding(schema) => Some(schema),
        }
    }

    pub fn descendants(&self) -> &HashSet<BlockId> {
        &self.descendants
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    /// Record that `id` is now awaited at one more position.
    pub(crate) fn expect(&mut self, id: BlockId) {
        self.descendants.insert(id);
        self.outstanding += 1;
    }

    /// Mark `positions` positions as resolved.
    pub(crate) fn resolve(&mut self, positions: usize) {
        if positions > self.outstanding {
            tracing::error!(
                root = %self.root,
                positions,
                outstanding = self.outstanding,
                "resolved more positions than outstanding"
            );
        }
        self.outstanding = self.outstanding.saturating_sub(positions);
    }

    /// Set the schema. The first assignment wins; later ones are logged.
    pub(crate) fn assign_schema(&mut self, schema: BlockSchema) {
        match &self.phase {
            RootPhase::Requested => self.phase = RootPhase::Expanding(schema),
            RootPhase::Expanding(current) => {
                tracing::warn!(
                    root = %self.root,
                    current = current.data_length(),
                    ignored = schema.data_length(),
                    "schema already assigned, keeping the first"
                );
            }
        }
    }

    /// Cancel this root's session and everything bound to it.
    pub(crate) fn cancel(&self) {
        self.session.cancellation().cancel();
    }
}
