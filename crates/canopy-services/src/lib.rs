//! canopy-services: the downloader and the collaborators it talks to.

pub mod cache;
pub mod downloader;
pub mod notify;
pub mod pending;
pub mod root_state;
pub mod session;
pub mod store;
pub mod transition;

pub use cache::FsBlockStore;
pub use downloader::{Downloader, DownloaderEvent, DownloaderHandle};
pub use notify::{ResourceUpdate, UpdateKind};
pub use pending::PendingIndex;
pub use root_state::{RootDownloadState, RootPhase};
pub use session::{FetchError, NetworkSession, SessionHandle, SessionId};
pub use store::{
    add_resource, read_resource, BlockStore, MemoryBlockStore, ResourceError, RootStatus,
    StoreError,
};
