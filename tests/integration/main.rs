//! Canopy integration tests.
//!
//! Every test runs the real downloader event loop against an in-process
//! peer that serves blocks out of its own store:
//!
//!   cargo test --test integration
//!
//! Set RUST_LOG=canopy_services=debug to follow the downloads.

mod download;
mod infra;
mod sharing;

pub use infra::*;
