//! Network sessions: the downloader's view of whoever serves blocks.
//!
//! A session is opened per in-flight root and bound to that root's
//! cancellation token. Fetches only schedule work; blocks come back later
//! through `DownloaderHandle::deliver`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use canopy_core::BlockId;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identity of a network session, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A session opened for one root. Cloning shares the same cancellation.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            id: SessionId::next(),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token that fires when the owning root is freed or the process stops.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("session {0} is cancelled")]
    Cancelled(SessionId),

    #[error("fetch failed: {0}")]
    Transport(String),
}

/// Network collaborator of the downloader.
pub trait NetworkSession: Send + Sync {
    /// Open a session whose lifetime is bounded by `cancel`.
    fn new_session(&self, cancel: CancellationToken) -> SessionHandle;

    /// Schedule retrieval of `blocks`. Must not block.
    fn fetch(&self, session: &SessionHandle, blocks: Vec<BlockId>) -> Result<(), FetchError>;
}
