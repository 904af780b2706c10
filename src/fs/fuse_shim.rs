//! FUSE Filesystem Shim for the Hash Chain
//!
//! This module presents the published chain state as a small read-only
//! filesystem, allowing it to be mounted and inspected with ordinary tools.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     User Applications                          │
//! │                  (cat, ls, stat, inotify...)                   │
//! └────────────────────────────────────────────────────────────────┘
//!                                  │ VFS syscalls
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │              Linux Kernel VFS  →  /dev/fuse                    │
//! └────────────────────────────────────────────────────────────────┘
//!                                  │ fuser crate
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    HashletFS (this module)                     │
//! │   Node table (fixed inodes)  ·  one SnapshotStore::read()      │
//! │   per request  ·  EROFS for every mutating call                │
//! └────────────────────────────────────────────────────────────────┘
//!                                  │ ArcSwap load
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │          SnapshotStore  ◀── publish ──  ChainGenerator         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Namespace
//!
//! ```text
//! /
//! ├── current        hex digest of the latest link
//! ├── nonce          nonce of the latest link
//! ├── sequence       decimal sequence of the latest link
//! └── history/
//!     ├── 57         hex digest of link 57 (oldest retained)
//!     └── ...
//! ```
//!
//! # Usage
//!
//! ```bash
//! hashlet-fs mount /mnt/chain      # requires --features fuse
//! cat /mnt/chain/current
//! ls /mnt/chain/history
//! fusermount -u /mnt/chain
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::chain::{ChainSnapshot, Link, SnapshotStore};
use crate::error::{HashletError, HashletResult};

use super::ops::ChainFs;

#[cfg(feature = "fuse")]
use std::ffi::OsStr;

#[cfg(feature = "fuse")]
use std::path::Path;

#[cfg(feature = "fuse")]
use tracing::{debug, info};

/// Inode number type (matches fuser's u64 inode convention)
pub type Ino = u64;

/// Root inode number (FUSE convention: inode 1 is root)
pub const ROOT_INO: Ino = 1;
pub const CURRENT_INO: Ino = 2;
pub const NONCE_INO: Ino = 3;
pub const SEQUENCE_INO: Ino = 4;
pub const HISTORY_INO: Ino = 5;

/// `/history/<n>` lives at inode `HISTORY_INO_BASE + n`
pub const HISTORY_INO_BASE: Ino = 0x1000;

/// Permission bits for files
pub const FILE_PERM: u16 = 0o444;

/// Permission bits for directories
pub const DIR_PERM: u16 = 0o555;

/// File attributes for FUSE
///
/// This mirrors fuser::FileAttr but is always available regardless
/// of feature flags, so the namespace logic works without the fuser crate.
#[derive(Clone, Debug)]
pub struct FileAttr {
    /// Inode number
    pub ino: Ino,
    /// File size in bytes
    pub size: u64,
    /// Number of 512-byte blocks allocated
    pub blocks: u64,
    /// Last access time
    pub atime: SystemTime,
    /// Last modification time
    pub mtime: SystemTime,
    /// Last status change time
    pub ctime: SystemTime,
    /// Creation time (macOS only)
    pub crtime: SystemTime,
    /// File type
    pub kind: FileKind,
    /// Permissions (mode & 0o7777)
    pub perm: u16,
    /// Hard link count
    pub nlink: u32,
    /// User ID of owner
    pub uid: u32,
    /// Group ID of owner
    pub gid: u32,
    /// Device ID (for special files)
    pub rdev: u32,
    /// Block size for filesystem I/O
    pub blksize: u32,
    /// Flags (macOS only)
    pub flags: u32,
}

impl Default for FileAttr {
    fn default() -> Self {
        let now = SystemTime::now();
        FileAttr {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileKind::RegularFile,
            perm: FILE_PERM,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

#[cfg(feature = "fuse")]
impl From<FileAttr> for fuser::FileAttr {
    fn from(attr: FileAttr) -> Self {
        fuser::FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
            kind: attr.kind.into(),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
            blksize: attr.blksize,
            flags: attr.flags,
        }
    }
}

/// File type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
}

#[cfg(feature = "fuse")]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::RegularFile => fuser::FileType::RegularFile,
        }
    }
}

/// Directory entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: Ino,
    pub name: String,
    pub kind: FileKind,
}

/// An entry of the fixed namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    Root,
    Current,
    Nonce,
    Sequence,
    History,
    /// `/history/<sequence>`; exists only while the link is retained
    HistoryLink(u64),
}

impl Node {
    pub fn from_ino(ino: Ino) -> Option<Node> {
        match ino {
            ROOT_INO => Some(Node::Root),
            CURRENT_INO => Some(Node::Current),
            NONCE_INO => Some(Node::Nonce),
            SEQUENCE_INO => Some(Node::Sequence),
            HISTORY_INO => Some(Node::History),
            _ => ino.checked_sub(HISTORY_INO_BASE).map(Node::HistoryLink),
        }
    }

    pub fn ino(self) -> Ino {
        match self {
            Node::Root => ROOT_INO,
            Node::Current => CURRENT_INO,
            Node::Nonce => NONCE_INO,
            Node::Sequence => SEQUENCE_INO,
            Node::History => HISTORY_INO,
            Node::HistoryLink(seq) => HISTORY_INO_BASE.saturating_add(seq),
        }
    }

    /// Parse an absolute or relative path into a node
    ///
    /// Only canonical decimal names (no sign, no leading zeros) address
    /// history entries, so each link has exactly one path.
    pub fn parse(path: &str) -> Option<Node> {
        let path = normalize_path(path);
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let node = match parts.next() {
            None => Node::Root,
            Some(first) => Node::Root.child(first)?,
        };
        match parts.next() {
            None => Some(node),
            Some(second) => {
                let child = node.child(second)?;
                parts.next().is_none().then_some(child)
            }
        }
    }

    /// Resolve `name` inside this node, ignoring retention
    pub fn child(self, name: &str) -> Option<Node> {
        match (self, name) {
            (Node::Root, "current") => Some(Node::Current),
            (Node::Root, "nonce") => Some(Node::Nonce),
            (Node::Root, "sequence") => Some(Node::Sequence),
            (Node::Root, "history") => Some(Node::History),
            (Node::History, name) => parse_sequence(name).map(Node::HistoryLink),
            _ => None,
        }
    }

    pub fn parent(self) -> Node {
        match self {
            Node::HistoryLink(_) => Node::History,
            _ => Node::Root,
        }
    }

    pub fn kind(self) -> FileKind {
        match self {
            Node::Root | Node::History => FileKind::Directory,
            _ => FileKind::RegularFile,
        }
    }

    pub fn name(self) -> String {
        match self {
            Node::Root => "/".to_string(),
            Node::Current => "current".to_string(),
            Node::Nonce => "nonce".to_string(),
            Node::Sequence => "sequence".to_string(),
            Node::History => "history".to_string(),
            Node::HistoryLink(seq) => seq.to_string(),
        }
    }

    pub fn path(self) -> String {
        match self {
            Node::Root => "/".to_string(),
            Node::HistoryLink(seq) => format!("/history/{}", seq),
            other => format!("/{}", other.name()),
        }
    }

    fn dir_entry(self) -> DirEntry {
        DirEntry {
            ino: self.ino(),
            name: self.name(),
            kind: self.kind(),
        }
    }
}

/// The HashletFS FUSE filesystem implementation
///
/// A read-only view of the chain. Every request takes exactly one snapshot
/// from the [`SnapshotStore`] and renders from it, so the fields of one
/// response always describe the same link. Separate requests may see
/// different links.
///
/// # Concurrency Model
///
/// `HashletFS` holds no mutable state of its own. Snapshot loads are
/// lock-free, so FUSE worker threads never contend with each other or with
/// the generator.
pub struct HashletFS {
    store: Arc<SnapshotStore>,

    /// TTL for cached attributes
    attr_ttl: Duration,

    /// TTL for cached entries
    entry_ttl: Duration,
}

impl HashletFS {
    /// Create a view over `store`
    ///
    /// Attribute and entry TTLs are zero by default since content changes
    /// every publish.
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        HashletFS {
            store,
            attr_ttl: Duration::ZERO,
            entry_ttl: Duration::ZERO,
        }
    }

    /// Override kernel cache TTLs
    pub fn with_ttl(mut self, attr_ttl: Duration, entry_ttl: Duration) -> Self {
        self.attr_ttl = attr_ttl;
        self.entry_ttl = entry_ttl;
        self
    }

    pub fn attr_ttl(&self) -> Duration {
        self.attr_ttl
    }

    pub fn entry_ttl(&self) -> Duration {
        self.entry_ttl
    }

    /// The snapshot store this view reads from
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Attributes of a node
    pub fn node_attr(&self, node: Node) -> HashletResult<FileAttr> {
        let snap = self.store.read();
        attr_in(&snap, node)
    }

    /// Look `name` up inside `parent`
    pub fn node_lookup(&self, parent: Node, name: &str) -> HashletResult<FileAttr> {
        if parent.kind() != FileKind::Directory {
            return Err(HashletError::NotADirectory(parent.path()));
        }
        let node = parent
            .child(name)
            .ok_or_else(|| HashletError::NotFound(child_path(parent, name)))?;
        let snap = self.store.read();
        attr_in(&snap, node)
    }

    /// Entries of a directory node
    pub fn node_readdir(&self, node: Node) -> HashletResult<Vec<DirEntry>> {
        let snap = self.store.read();
        entries_in(&snap, node)
    }

    /// Bytes `offset..offset + size` of a file node
    pub fn node_read(&self, node: Node, offset: u64, size: u32) -> HashletResult<Vec<u8>> {
        let snap = self.store.read();
        let content = content_in(&snap, node)?;
        Ok(slice_range(&content, offset, size))
    }

    /// Number of entries in the namespace right now
    pub fn entry_count(&self) -> u64 {
        4 + self.store.read().history_len() as u64
    }

    fn resolve(&self, path: &str) -> HashletResult<Node> {
        Node::parse(path).ok_or_else(|| HashletError::NotFound(normalize_path(path)))
    }
}

impl ChainFs for HashletFS {
    fn lookup(&self, path: &str) -> HashletResult<FileKind> {
        let node = self.resolve(path)?;
        let snap = self.store.read();
        ensure_exists(&snap, node)?;
        Ok(node.kind())
    }

    fn getattr(&self, path: &str) -> HashletResult<FileAttr> {
        self.node_attr(self.resolve(path)?)
    }

    fn readdir(&self, path: &str) -> HashletResult<Vec<DirEntry>> {
        self.node_readdir(self.resolve(path)?)
    }

    fn read(&self, path: &str, offset: u64, size: u32) -> HashletResult<Vec<u8>> {
        self.node_read(self.resolve(path)?, offset, size)
    }
}

// =============================================================================
// RENDERING (all from a single snapshot)
// =============================================================================

fn ensure_exists(snap: &ChainSnapshot, node: Node) -> HashletResult<()> {
    match node {
        Node::HistoryLink(seq) if snap.history_link(seq).is_none() => {
            Err(HashletError::NotFound(node.path()))
        }
        _ => Ok(()),
    }
}

/// The link whose data a node shows
fn link_for<'a>(snap: &'a ChainSnapshot, node: Node) -> HashletResult<&'a Link> {
    match node {
        Node::HistoryLink(seq) => snap
            .history_link(seq)
            .ok_or_else(|| HashletError::NotFound(node.path())),
        _ => Ok(snap.current()),
    }
}

fn content_in(snap: &ChainSnapshot, node: Node) -> HashletResult<Vec<u8>> {
    let link = link_for(snap, node)?;
    match node {
        Node::Root | Node::History => Err(HashletError::IsADirectory(node.path())),
        Node::Current | Node::HistoryLink(_) => Ok(link.digest_hex().into_bytes()),
        Node::Nonce => Ok(link.nonce.clone()),
        Node::Sequence => Ok(link.sequence.to_string().into_bytes()),
    }
}

fn attr_in(snap: &ChainSnapshot, node: Node) -> HashletResult<FileAttr> {
    let link = link_for(snap, node)?;
    let stamp = link.published_at;
    let base = FileAttr {
        ino: node.ino(),
        atime: stamp,
        mtime: stamp,
        ctime: stamp,
        crtime: stamp,
        kind: node.kind(),
        ..Default::default()
    };

    match node.kind() {
        FileKind::Directory => Ok(FileAttr {
            perm: DIR_PERM,
            // "." plus the parent's entry, plus ".." of a subdirectory
            nlink: if node == Node::Root { 3 } else { 2 },
            ..base
        }),
        FileKind::RegularFile => {
            let size = content_in(snap, node)?.len() as u64;
            Ok(FileAttr {
                size,
                blocks: size.div_ceil(512),
                perm: FILE_PERM,
                nlink: 1,
                ..base
            })
        }
    }
}

fn entries_in(snap: &ChainSnapshot, node: Node) -> HashletResult<Vec<DirEntry>> {
    match node {
        Node::Root => Ok([Node::Current, Node::Nonce, Node::Sequence, Node::History]
            .into_iter()
            .map(Node::dir_entry)
            .collect()),
        Node::History => Ok(snap
            .history()
            .map(|link| Node::HistoryLink(link.sequence).dir_entry())
            .collect()),
        Node::HistoryLink(_) => {
            ensure_exists(snap, node)?;
            Err(HashletError::NotADirectory(node.path()))
        }
        _ => Err(HashletError::NotADirectory(node.path())),
    }
}

// =============================================================================
// FUSER FILESYSTEM TRAIT IMPLEMENTATION
// =============================================================================

#[cfg(feature = "fuse")]
impl HashletFS {
    fn node_or_enoent(ino: u64) -> Result<Node, libc::c_int> {
        Node::from_ino(ino).ok_or(libc::ENOENT)
    }

    /// Path of `name` inside `parent`, for the rejected mutating calls
    fn fuse_child_path(parent: u64, name: &OsStr) -> Result<String, libc::c_int> {
        let parent = Self::node_or_enoent(parent)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(child_path(parent, name))
    }
}

#[cfg(feature = "fuse")]
impl fuser::Filesystem for HashletFS {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        let snap = self.store.read();
        info!(
            sequence = snap.current().sequence,
            history = snap.history_len(),
            "HashletFS initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!(sequence = self.store.read().current().sequence, "HashletFS unmounted");
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let Some(parent) = Node::from_ino(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.node_lookup(parent, name) {
            Ok(attr) => reply.entry(&self.entry_ttl, &attr.into(), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let result = Self::node_or_enoent(ino)
            .and_then(|node| self.node_attr(node).map_err(|e| e.errno()));
        match result {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr.into()),
            Err(errno) => reply.error(errno),
        }
    }

    /// Any attribute change is a mutation; a bare query returns attributes
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        let node = match Self::node_or_enoent(ino) {
            Ok(node) => node,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let path = node.path();

        let rejected = if let Some(size) = size {
            Some(ChainFs::truncate(&*self, &path, size))
        } else if let Some(mode) = mode {
            Some(ChainFs::chmod(&*self, &path, mode))
        } else if uid.is_some() || gid.is_some() || atime.is_some() || mtime.is_some() {
            Some(Err(HashletError::ReadOnly))
        } else {
            None
        };

        match rejected {
            Some(Err(e)) => reply.error(e.errno()),
            _ => match self.node_attr(node) {
                Ok(attr) => reply.attr(&self.attr_ttl, &attr.into()),
                Err(e) => reply.error(e.errno()),
            },
        }
    }

    fn mknod(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        match Self::fuse_child_path(parent, name) {
            Ok(path) => match ChainFs::create(&*self, &path, mode) {
                Ok(attr) => reply.entry(&self.entry_ttl, &attr.into(), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        match Self::fuse_child_path(parent, name) {
            Ok(path) => match ChainFs::mkdir(&*self, &path, mode) {
                Ok(attr) => reply.entry(&self.entry_ttl, &attr.into(), 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let result = Self::fuse_child_path(parent, name)
            .and_then(|path| ChainFs::unlink(&*self, &path).map_err(|e| e.errno()));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        let result = Self::fuse_child_path(parent, name)
            .and_then(|path| ChainFs::rmdir(&*self, &path).map_err(|e| e.errno()));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        let result = Self::fuse_child_path(parent, name).and_then(|from| {
            let to = Self::fuse_child_path(newparent, newname)?;
            ChainFs::rename(&*self, &from, &to).map_err(|e| e.errno())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let node = match Self::node_or_enoent(ino) {
            Ok(node) => node,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if node.kind() == FileKind::Directory {
            reply.error(libc::EISDIR);
            return;
        }
        if let Err(e) = self.node_attr(node) {
            reply.error(e.errno());
            return;
        }

        let write_flags = libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_TRUNC;
        if flags & write_flags != 0 {
            reply.error(HashletError::ReadOnly.errno());
            return;
        }

        // Stateless: content is re-rendered on every read.
        reply.opened(0, fuser::consts::FOPEN_DIRECT_IO);
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let result = Self::node_or_enoent(ino)
            .and_then(|node| self.node_read(node, offset as u64, size).map_err(|e| e.errno()));
        match result {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let result = Self::node_or_enoent(ino).and_then(|node| {
            ChainFs::write(&*self, &node.path(), offset.max(0) as u64, data).map_err(|e| e.errno())
        });
        match result {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        match Self::fuse_child_path(parent, name) {
            Ok(path) => match ChainFs::create(&*self, &path, mode) {
                Ok(attr) => reply.created(&self.entry_ttl, &attr.into(), 0, 0, 0),
                Err(e) => reply.error(e.errno()),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _flags: i32,
        reply: fuser::ReplyOpen,
    ) {
        match Node::from_ino(ino) {
            Some(node) if node.kind() == FileKind::Directory => reply.opened(0, 0),
            Some(node) => match self.node_attr(node) {
                Ok(_) => reply.error(libc::ENOTDIR),
                Err(e) => reply.error(e.errno()),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    /// Directory listings are offset-paginated; a publish between two
    /// `readdir` calls on `/history` may shift entries.
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let node = match Self::node_or_enoent(ino) {
            Ok(node) => node,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let listing = match self.node_readdir(node) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut entries: Vec<(u64, fuser::FileType, String)> = Vec::with_capacity(listing.len() + 2);
        entries.push((ino, fuser::FileType::Directory, ".".to_string()));
        entries.push((node.parent().ino(), fuser::FileType::Directory, "..".to_string()));
        entries.extend(
            listing
                .into_iter()
                .map(|e| (e.ino, fuser::FileType::from(e.kind), e.name)),
        );

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // Reply returns true if buffer is full
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let files = self.entry_count();
        reply.statfs(
            files, // blocks: one small block per entry
            0,     // bfree
            0,     // bavail
            files, // files
            0,     // ffree
            512,   // bsize
            255,   // namelen
            512,   // frsize
        );
    }

    fn access(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mask: i32,
        reply: fuser::ReplyEmpty,
    ) {
        let node = match Self::node_or_enoent(ino) {
            Ok(node) => node,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(e) = self.node_attr(node) {
            reply.error(e.errno());
            return;
        }
        if mask & libc::W_OK != 0 {
            debug!(path = %node.path(), "write access denied");
            reply.error(libc::EROFS);
            return;
        }
        reply.ok();
    }
}

// =============================================================================
// MOUNT FUNCTIONS
// =============================================================================

/// Mount options for HashletFS
///
/// The mount is always read-only.
#[cfg(feature = "fuse")]
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// Allow other users to access the mount (default: false)
    pub allow_other: bool,
    /// Allow root to access the mount (default: true)
    pub allow_root: bool,
    /// Filesystem name shown in mount output
    pub fsname: String,
}

#[cfg(feature = "fuse")]
impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: true,
            fsname: "hashlet".to_string(),
        }
    }
}

#[cfg(feature = "fuse")]
impl MountOptions {
    fn to_fuser(&self) -> Vec<fuser::MountOption> {
        use fuser::MountOption;

        let mut options = vec![
            MountOption::FSName(self.fsname.clone()),
            MountOption::DefaultPermissions,
            MountOption::RO,
        ];

        // fuser refuses auto_unmount without one of these
        if self.allow_other {
            options.push(MountOption::AllowOther);
            options.push(MountOption::AutoUnmount);
        } else if self.allow_root {
            options.push(MountOption::AllowRoot);
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

/// Mount a HashletFS at the specified path
///
/// Blocks until the filesystem is unmounted. Use [`spawn_mount`] for a
/// non-blocking version.
#[cfg(feature = "fuse")]
pub fn mount<P: AsRef<Path>>(
    fs: HashletFS,
    mountpoint: P,
    options: MountOptions,
) -> Result<(), std::io::Error> {
    fuser::mount2(fs, mountpoint.as_ref(), &options.to_fuser())
}

/// Spawn a HashletFS mount in a background thread
///
/// Returns a `BackgroundSession` that unmounts when dropped.
#[cfg(feature = "fuse")]
pub fn spawn_mount<P: AsRef<Path>>(
    fs: HashletFS,
    mountpoint: P,
    options: MountOptions,
) -> Result<fuser::BackgroundSession, std::io::Error> {
    fuser::spawn_mount2(fs, mountpoint.as_ref(), &options.to_fuser())
}

// =============================================================================
// UTILITY FUNCTIONS
// =============================================================================

/// Normalize a path (ensure leading /, remove trailing /)
#[inline]
fn normalize_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    if path.len() > 1 && path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        path
    }
}

fn child_path(parent: Node, name: &str) -> String {
    match parent {
        Node::Root => format!("/{}", name),
        other => format!("{}/{}", other.path(), name),
    }
}

/// Canonical decimal sequence name
fn parse_sequence(name: &str) -> Option<u64> {
    let seq: u64 = name.parse().ok()?;
    (seq.to_string() == name).then_some(seq)
}

fn slice_range(data: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let Ok(start) = usize::try_from(offset) else {
        return Vec::new();
    };
    if start >= data.len() || size == 0 {
        return Vec::new();
    }
    let end = start.saturating_add(size as usize).min(data.len());
    data[start..end].to_vec()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainGenerator, Sha256Digest};
    use crate::config::ChainConfig;

    const GENESIS_HEX: &str = "e0cfd84c1d54f93e5fa0661a039428398ebb46212f618fda7f1be15846a36379";

    fn fs_with(publishes: u64, capacity: usize) -> (HashletFS, ChainGenerator<Sha256Digest>) {
        let config = ChainConfig {
            history_capacity: capacity,
            ..Default::default()
        };
        let (mut generator, store) = ChainGenerator::new(&config).unwrap();
        for _ in 0..publishes {
            generator.step().unwrap();
        }
        (HashletFS::new(store), generator)
    }

    fn read_all(fs: &HashletFS, path: &str) -> String {
        String::from_utf8(fs.read(path, 0, 4096).unwrap()).unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("foo"), "/foo");
        assert_eq!(normalize_path("/foo"), "/foo");
        assert_eq!(normalize_path("/foo/"), "/foo");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_parse_nodes() {
        assert_eq!(Node::parse("/"), Some(Node::Root));
        assert_eq!(Node::parse("current"), Some(Node::Current));
        assert_eq!(Node::parse("/history/"), Some(Node::History));
        assert_eq!(Node::parse("/history/42"), Some(Node::HistoryLink(42)));
        assert_eq!(Node::parse("/history/042"), None);
        assert_eq!(Node::parse("/history/-1"), None);
        assert_eq!(Node::parse("/history/42/x"), None);
        assert_eq!(Node::parse("/current/x"), None);
        assert_eq!(Node::parse("/missing"), None);
    }

    #[test]
    fn test_ino_round_trip() {
        for node in [
            Node::Root,
            Node::Current,
            Node::Nonce,
            Node::Sequence,
            Node::History,
            Node::HistoryLink(0),
            Node::HistoryLink(123_456),
        ] {
            assert_eq!(Node::from_ino(node.ino()), Some(node));
            assert_eq!(Node::parse(&node.path()), Some(node));
        }
        assert_eq!(Node::from_ino(0), None);
        assert_eq!(Node::from_ino(HISTORY_INO + 1), None);
    }

    #[test]
    fn test_genesis_content() {
        let (fs, _gen) = fs_with(0, 8);
        assert_eq!(read_all(&fs, "/current"), GENESIS_HEX);
        assert_eq!(read_all(&fs, "/nonce"), "0");
        assert_eq!(read_all(&fs, "/sequence"), "0");
    }

    #[test]
    fn test_sequence_after_five_publishes() {
        let (fs, _gen) = fs_with(5, 8);
        assert_eq!(read_all(&fs, "/sequence"), "5");
    }

    #[test]
    fn test_nonce_is_previous_digest() {
        let (fs, _gen) = fs_with(1, 8);
        assert_eq!(read_all(&fs, "/nonce"), GENESIS_HEX);
        assert_eq!(read_all(&fs, "/history/0"), GENESIS_HEX);
    }

    #[test]
    fn test_write_to_current_rejected_and_unchanged() {
        let (fs, _gen) = fs_with(3, 8);
        let before = read_all(&fs, "/current");
        let generation = fs.store().generation();

        let err = fs.write("/current", 0, b"deadbeef").unwrap_err();
        assert!(matches!(err, HashletError::ReadOnly));
        assert_eq!(err.errno(), libc::EROFS);

        assert_eq!(read_all(&fs, "/current"), before);
        assert_eq!(fs.store().generation(), generation);
    }

    #[test]
    fn test_every_mutation_rejected() {
        let (fs, _gen) = fs_with(2, 8);
        for path in ["/", "/current", "/nonce", "/sequence", "/history", "/history/1", "/new"] {
            assert!(matches!(fs.write(path, 0, b"x"), Err(HashletError::ReadOnly)));
            assert!(matches!(fs.create(path, 0o644), Err(HashletError::ReadOnly)));
            assert!(matches!(ChainFs::mkdir(&fs, path, 0o755), Err(HashletError::ReadOnly)));
            assert!(matches!(ChainFs::unlink(&fs, path), Err(HashletError::ReadOnly)));
            assert!(matches!(ChainFs::rmdir(&fs, path), Err(HashletError::ReadOnly)));
            assert!(matches!(fs.rename(path, "/other"), Err(HashletError::ReadOnly)));
            assert!(matches!(fs.truncate(path, 0), Err(HashletError::ReadOnly)));
            assert!(matches!(fs.chmod(path, 0o777), Err(HashletError::ReadOnly)));
        }
        assert_eq!(fs.store().generation(), 2);
    }

    #[test]
    fn test_root_listing() {
        let (fs, _gen) = fs_with(0, 8);
        let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["current", "nonce", "sequence", "history"]);
        assert_eq!(fs.lookup("/history").unwrap(), FileKind::Directory);
        assert_eq!(fs.lookup("/current").unwrap(), FileKind::RegularFile);
    }

    #[test]
    fn test_history_listing_is_bounded() {
        let (fs, _gen) = fs_with(10, 4);
        let names: Vec<String> = fs
            .readdir("/history")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["7", "8", "9", "10"]);

        assert!(matches!(fs.read("/history/6", 0, 64), Err(HashletError::NotFound(_))));
        assert!(matches!(fs.lookup("/history/6"), Err(HashletError::NotFound(_))));
        assert_eq!(read_all(&fs, "/history/10"), read_all(&fs, "/current"));
    }

    #[test]
    fn test_unknown_paths_not_found() {
        let (fs, _gen) = fs_with(0, 8);
        assert!(matches!(fs.getattr("/nope"), Err(HashletError::NotFound(_))));
        assert!(matches!(fs.read("/history/99", 0, 10), Err(HashletError::NotFound(_))));
        assert!(matches!(fs.readdir("/missing"), Err(HashletError::NotFound(_))));
    }

    #[test]
    fn test_kind_errors() {
        let (fs, _gen) = fs_with(0, 8);
        assert!(matches!(fs.read("/", 0, 10), Err(HashletError::IsADirectory(_))));
        assert!(matches!(fs.read("/history", 0, 10), Err(HashletError::IsADirectory(_))));
        assert!(matches!(fs.readdir("/current"), Err(HashletError::NotADirectory(_))));
        assert!(matches!(fs.readdir("/history/0"), Err(HashletError::NotADirectory(_))));
        assert!(matches!(
            fs.node_lookup(Node::Current, "x"),
            Err(HashletError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_attrs() {
        let (fs, generator) = fs_with(12, 8);
        let current = fs.getattr("/current").unwrap();
        assert_eq!(current.size, 64);
        assert_eq!(current.perm, FILE_PERM);
        assert_eq!(current.kind, FileKind::RegularFile);
        assert_eq!(current.mtime, generator.head().published_at);

        assert_eq!(fs.getattr("/sequence").unwrap().size, 2);
        assert_eq!(fs.getattr("/nonce").unwrap().size, 64);

        let root = fs.getattr("/").unwrap();
        assert_eq!(root.kind, FileKind::Directory);
        assert_eq!(root.perm, DIR_PERM);
        assert_eq!(root.ino, ROOT_INO);

        let old = fs.getattr("/history/5").unwrap();
        assert_eq!(old.ino, HISTORY_INO_BASE + 5);
        assert!(old.mtime <= current.mtime);
    }

    #[test]
    fn test_partial_reads() {
        let (fs, _gen) = fs_with(0, 8);
        assert_eq!(fs.read("/current", 0, 4).unwrap(), b"e0cf");
        assert_eq!(fs.read("/current", 60, 100).unwrap(), b"6379");
        assert!(fs.read("/current", 64, 10).unwrap().is_empty());
        assert!(fs.read("/current", u64::MAX, 10).unwrap().is_empty());
        assert!(fs.read("/current", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_reads_follow_publishes() {
        let (fs, mut generator) = fs_with(0, 8);
        let first = read_all(&fs, "/current");
        generator.step().unwrap();
        let second = read_all(&fs, "/current");
        assert_ne!(first, second);
        assert_eq!(read_all(&fs, "/nonce"), first);
        assert_eq!(fs.entry_count(), 6);
    }

    #[test]
    fn test_file_kind_conversion() {
        #[cfg(feature = "fuse")]
        {
            let dir: fuser::FileType = FileKind::Directory.into();
            assert_eq!(dir, fuser::FileType::Directory);

            let file: fuser::FileType = FileKind::RegularFile.into();
            assert_eq!(file, fuser::FileType::RegularFile);
        }
    }
}
