//! # hashlet-fs
//!
//! A SHA-256 hash chain that extends itself on a background thread and is
//! served as a small read-only filesystem.
//!
//! - [`chain`]: links, the generator, and the copy-on-publish snapshot store
//! - [`fs`]: the namespace (`/current`, `/nonce`, `/sequence`, `/history/<n>`)
//!   and, with the `fuse` feature, the `fuser` binding and mount helpers
//! - [`signal`]: shutdown coordination for the generator and the mount loop

pub mod chain;
pub mod config;
pub mod error;
pub mod fs;
pub mod signal;

pub use chain::{ChainGenerator, ChainHandle, ChainSnapshot, Link, SnapshotStore};
pub use config::ChainConfig;
pub use error::{HashletError, HashletResult};
pub use fs::*;
