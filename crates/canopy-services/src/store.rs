//! Block store: where blocks and per-root download status live.
//!
//! The downloader never owns storage. It reads through this trait to skip
//! blocks it already has, writes blocks it has validated, and records a
//! status per root so a completed download survives the process.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use canopy_core::blob::{join_blob, split_blob, JoinError};
use canopy_core::{BlockId, DataTag, FormatError, MaxBlockSize, RootId};

/// Download status of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootStatus {
    /// Some blocks may be present; a download was started.
    Partial,
    /// Every block of the tree is present and validated.
    Full,
}

impl RootStatus {
    /// Whether a root currently in `from` may be moved to `to`.
    ///
    /// `Partial` may be re-entered so that a download abandoned by a timeout
    /// can be retried. `Full` is terminal.
    pub fn transition_allowed(from: Option<RootStatus>, to: RootStatus) -> bool {
        matches!(
            (from, to),
            (None, RootStatus::Partial)
                | (Some(RootStatus::Partial), RootStatus::Partial)
                | (Some(RootStatus::Partial), RootStatus::Full)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RootStatus::Partial => "partial",
            RootStatus::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "partial" => Some(RootStatus::Partial),
            "full" => Some(RootStatus::Full),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("block {0} not found")]
    NotFound(BlockId),

    #[error("status of {root} cannot move from {from:?} to {to:?}")]
    StatusConflict {
        root: RootId,
        from: Option<RootStatus>,
        to: RootStatus,
    },

    #[error("storage backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Storage collaborator of the downloader.
pub trait BlockStore: Send + Sync {
    /// Raw bytes of a block.
    fn view(&self, id: &BlockId) -> Result<Bytes, StoreError>;

    /// Store a block. Storing a block twice is a no-op.
    fn put(&self, id: &BlockId, data: &[u8]) -> Result<(), StoreError>;

    /// Move a root to `status`, failing with `StatusConflict` on a
    /// transition `RootStatus::transition_allowed` rejects.
    fn set_status(&self, root: &RootId, status: RootStatus) -> Result<(), StoreError>;

    fn get_status(&self, root: &RootId) -> Result<Option<RootStatus>, StoreError>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// Block store held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    blocks: std::sync::Arc<DashMap<BlockId, Bytes>>,
    statuses: std::sync::Arc<DashMap<RootId, RootStatus>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }
}

impl BlockStore for MemoryBlockStore {
    fn view(&self, id: &BlockId) -> Result<Bytes, StoreError> {
        self.blocks
            .get(id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    fn put(&self, id: &BlockId, data: &[u8]) -> Result<(), StoreError> {
        self.blocks
            .entry(*id)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(())
    }

    fn set_status(&self, root: &RootId, status: RootStatus) -> Result<(), StoreError> {
        match self.statuses.entry(*root) {
            Entry::Occupied(mut entry) => {
                let from = Some(*entry.get());
                if !RootStatus::transition_allowed(from, status) {
                    return Err(StoreError::StatusConflict {
                        root: *root,
                        from,
                        to: status,
                    });
                }
                entry.insert(status);
            }
            Entry::Vacant(entry) => {
                if !RootStatus::transition_allowed(None, status) {
                    return Err(StoreError::StatusConflict {
                        root: *root,
                        from: None,
                        to: status,
                    });
                }
                entry.insert(status);
            }
        }
        Ok(())
    }

    fn get_status(&self, root: &RootId) -> Result<Option<RootStatus>, StoreError> {
        Ok(self.statuses.get(root).map(|s| *s.value()))
    }
}

// ── Resources ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("root {0} is not fully downloaded")]
    Incomplete(RootId),
}

/// Split `payload` into blocks, store them and mark the root `Full`.
///
/// Adding a payload that is already fully stored returns its root again.
pub fn add_resource(
    store: &dyn BlockStore,
    max: MaxBlockSize,
    tag: DataTag,
    payload: &[u8],
) -> Result<RootId, ResourceError> {
    let blob = split_blob(max, tag, payload)?;
    if store.get_status(&blob.root)? == Some(RootStatus::Full) {
        return Ok(blob.root);
    }

    for (id, raw) in &blob.blocks {
        store.put(id, raw)?;
    }
    store.set_status(&blob.root, RootStatus::Partial)?;
    store.set_status(&blob.root, RootStatus::Full)?;

    tracing::debug!(
        root = %blob.root,
        tag = %tag,
        blocks = blob.blocks.len(),
        payload_len = payload.len(),
        "resource added"
    );
    Ok(blob.root)
}

/// Reassemble a fully downloaded root.
pub fn read_resource(
    store: &dyn BlockStore,
    max: MaxBlockSize,
    root: &RootId,
) -> Result<(DataTag, Vec<u8>), ResourceError> {
    if store.get_status(root)? != Some(RootStatus::Full) {
        return Err(ResourceError::Incomplete(*root));
    }
    let mut failure = None;
    let joined = join_blob(max, root, |id| match store.view(id) {
        Ok(raw) => Some(raw),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => {
            failure = Some(e);
            None
        }
    });
    match (joined, failure) {
        (Ok(resource), _) => Ok(resource),
        (Err(_), Some(e)) => Err(e.into()),
        (Err(e), None) => Err(e.into()),
    }
}
