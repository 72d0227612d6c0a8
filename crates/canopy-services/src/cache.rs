//! Filesystem block store.
//!
//! Blocks are stored by content hash in a two-level directory structure:
//!   {root}/blocks/{hash[0..2]}/{full_hash}
//!
//! Root statuses live next to them as small text files:
//!   {root}/status/{full_hash}
//!
//! Block files are immutable: if the hash exists, the content is correct.
//! Status files are rewritten through the same tmp-then-rename path, under
//! a lock so the transition check and the write are one step.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use bytes::Bytes;
use memmap2::Mmap;

use canopy_core::{BlockId, RootId};

use crate::store::{BlockStore, RootStatus, StoreError};

#[derive(Debug)]
pub struct FsBlockStore {
    root: PathBuf,
    status_lock: Mutex<()>,
}

impl FsBlockStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [root.join("blocks"), root.join("status")] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create store dir: {}", dir.display()))?;
        }
        Ok(Self {
            root,
            status_lock: Mutex::new(()),
        })
    }

    pub fn has(&self, id: &BlockId) -> bool {
        self.block_path(id).exists()
    }

    fn read_block(&self, id: &BlockId) -> Result<Option<Bytes>> {
        let path = self.block_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path)
            .with_context(|| format!("failed to open block: {}", path.display()))?;

        // Safety: file is opened read-only, block files are never modified in place
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap block: {}", path.display()))?
        };

        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    fn read_status(&self, root: &RootId) -> Result<Option<RootStatus>> {
        let path = self.status_path(root);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read status: {}", path.display()))?;
        let status = RootStatus::parse(text.trim())
            .with_context(|| format!("unknown status {:?} in {}", text.trim(), path.display()))?;
        Ok(Some(status))
    }

    fn block_path(&self, id: &BlockId) -> PathBuf {
        let hex = id.to_string();
        // Two-level: blocks/ab/abc123...
        self.root.join("blocks").join(&hex[0..2]).join(&hex)
    }

    fn status_path(&self, root: &RootId) -> PathBuf {
        self.root.join("status").join(root.to_string())
    }

    /// Count total blocks in the store (for stats/debugging).
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(self.root.join("blocks")) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }
}

/// Atomic write: tmp file → rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(data).context("failed to write data")?;
        file.sync_all().context("failed to sync to disk")?;
    }

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })
}

impl BlockStore for FsBlockStore {
    fn view(&self, id: &BlockId) -> Result<Bytes, StoreError> {
        self.read_block(id)?.ok_or(StoreError::NotFound(*id))
    }

    fn put(&self, id: &BlockId, data: &[u8]) -> Result<(), StoreError> {
        let path = self.block_path(id);
        if path.exists() {
            return Ok(());
        }
        write_atomic(&path, data)?;
        tracing::trace!(block = %id, "block stored");
        Ok(())
    }

    fn set_status(&self, root: &RootId, status: RootStatus) -> Result<(), StoreError> {
        let _guard = self
            .status_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("status lock poisoned"))?;
        let from = self.read_status(root)?;
        if !RootStatus::transition_allowed(from, status) {
            return Err(StoreError::StatusConflict {
                root: *root,
                from,
                to: status,
            });
        }
        write_atomic(&self.status_path(root), status.as_str().as_bytes())?;
        Ok(())
    }

    fn get_status(&self, root: &RootId) -> Result<Option<RootStatus>, StoreError> {
        Ok(self.read_status(root)?)
    }
}
