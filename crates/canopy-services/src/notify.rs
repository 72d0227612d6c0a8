//! Outward notifications about finished downloads.

use std::fmt;

use canopy_core::RootId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Every block of the root is stored and the root is marked `Full`.
    Added,
    /// The tree turned out malformed; the download was abandoned.
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub kind: UpdateKind,
    pub root: RootId,
}

impl ResourceUpdate {
    pub fn added(root: RootId) -> Self {
        Self {
            kind: UpdateKind::Added,
            root,
        }
    }

    pub fn broken(root: RootId) -> Self {
        Self {
            kind: UpdateKind::Broken,
            root,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Added => write!(f, "added"),
            UpdateKind::Broken => write!(f, "broken"),
        }
    }
}
