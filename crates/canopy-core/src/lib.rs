//! canopy-core: block ids, wire format, tree layout and schemas.
//! All other Canopy crates depend on this one.

pub mod blob;
pub mod config;
pub mod crypto;
pub mod layout;
pub mod schema;
pub mod wire;

pub use crypto::{BlockId, RootId};
pub use layout::{DepthIndices, NodeIndex};
pub use schema::{BlockSchema, MaxBlockSize};
pub use wire::{DataTag, FormatError};
