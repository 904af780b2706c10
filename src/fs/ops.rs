//! Path-level filesystem interface
//!
//! One method per filesystem call the dispatch layer can make. The read side
//! must be implemented; every mutating call defaults to
//! [`HashletError::ReadOnly`], which is the only behaviour the chain
//! namespace allows.

use super::fuse_shim::{DirEntry, FileAttr, FileKind};
use crate::error::{HashletError, HashletResult};

pub trait ChainFs {
    /// Kind of the entry at `path`
    fn lookup(&self, path: &str) -> HashletResult<FileKind>;

    /// Attributes of the entry at `path`
    fn getattr(&self, path: &str) -> HashletResult<FileAttr>;

    /// Entries of the directory at `path`, without `.` and `..`
    fn readdir(&self, path: &str) -> HashletResult<Vec<DirEntry>>;

    /// Up to `size` bytes of the file at `path`, starting at `offset`
    fn read(&self, path: &str, offset: u64, size: u32) -> HashletResult<Vec<u8>>;

    fn write(&self, _path: &str, _offset: u64, _data: &[u8]) -> HashletResult<u32> {
        Err(HashletError::ReadOnly)
    }

    fn create(&self, _path: &str, _mode: u32) -> HashletResult<FileAttr> {
        Err(HashletError::ReadOnly)
    }

    fn mkdir(&self, _path: &str, _mode: u32) -> HashletResult<FileAttr> {
        Err(HashletError::ReadOnly)
    }

    fn unlink(&self, _path: &str) -> HashletResult<()> {
        Err(HashletError::ReadOnly)
    }

    fn rmdir(&self, _path: &str) -> HashletResult<()> {
        Err(HashletError::ReadOnly)
    }

    fn rename(&self, _from: &str, _to: &str) -> HashletResult<()> {
        Err(HashletError::ReadOnly)
    }

    fn truncate(&self, _path: &str, _size: u64) -> HashletResult<()> {
        Err(HashletError::ReadOnly)
    }

    fn chmod(&self, _path: &str, _mode: u32) -> HashletResult<()> {
        Err(HashletError::ReadOnly)
    }
}
