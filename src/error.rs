//! Error types for the hash chain and its filesystem view
//!
//! Filesystem-facing variants (`NotFound`, `ReadOnly`, ...) are returned to the
//! dispatch layer and mapped to errno values with [`HashletError::errno`].
//! Generator-side variants (`DigestFailure`, `SequenceGap`) are fatal: the
//! generator stops rather than publish a link it cannot vouch for.

use std::io;
use std::time::Duration;

/// Result type for chain and filesystem operations
pub type HashletResult<T> = Result<T, HashletError>;

/// Errors produced by the chain generator, snapshot store, and adapter
#[derive(Debug, thiserror::Error)]
pub enum HashletError {
    /// Path or inode outside the fixed namespace, or a history entry that
    /// has already been evicted
    #[error("not found: {0}")]
    NotFound(String),

    /// Any mutating filesystem call
    #[error("read-only filesystem")]
    ReadOnly,

    /// Directory operation on a regular file
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// File operation on a directory
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Malformed request (negative offset, undecodable name)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No link has been published for much longer than the configured interval
    #[error("generator stalled: no publish for {elapsed:?} (interval {interval:?})")]
    GeneratorStalled { elapsed: Duration, interval: Duration },

    /// The digest primitive failed; continuing would corrupt the chain
    #[error("digest computation failed: {0}")]
    DigestFailure(String),

    /// The generator thread panicked; carries the panic message when it is a string
    #[error("generator thread panicked: {0}")]
    GeneratorPanicked(String),

    /// A publish that does not extend the current head by exactly one
    #[error("sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    /// Verification found a link that does not follow from its predecessor
    #[error("chain broken at sequence {sequence}: {reason}")]
    ChainBroken { sequence: u64, reason: String },

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HashletError {
    /// errno value reported to the kernel for this error
    pub fn errno(&self) -> libc::c_int {
        match self {
            HashletError::NotFound(_) => libc::ENOENT,
            HashletError::ReadOnly => libc::EROFS,
            HashletError::NotADirectory(_) => libc::ENOTDIR,
            HashletError::IsADirectory(_) => libc::EISDIR,
            HashletError::InvalidArgument(_) | HashletError::InvalidConfig(_) => libc::EINVAL,
            HashletError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }

    /// Whether the generator must stop after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HashletError::DigestFailure(_)
                | HashletError::GeneratorPanicked(_)
                | HashletError::SequenceGap { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(HashletError::NotFound("/x".into()).errno(), libc::ENOENT);
        assert_eq!(HashletError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(HashletError::IsADirectory("/".into()).errno(), libc::EISDIR);
        assert_eq!(
            HashletError::Io(io::Error::from_raw_os_error(libc::EACCES)).errno(),
            libc::EACCES
        );
        assert_eq!(HashletError::DigestFailure("boom".into()).errno(), libc::EIO);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(HashletError::DigestFailure("x".into()).is_fatal());
        assert!(HashletError::SequenceGap { expected: 2, actual: 4 }.is_fatal());
        assert!(HashletError::GeneratorPanicked("x".into()).is_fatal());
        assert!(!HashletError::ReadOnly.is_fatal());
        assert!(!HashletError::GeneratorStalled {
            elapsed: Duration::from_secs(9),
            interval: Duration::from_millis(100),
        }
        .is_fatal());
    }

    #[test]
    fn test_display() {
        let err = HashletError::SequenceGap { expected: 5, actual: 7 };
        assert_eq!(err.to_string(), "sequence gap: expected 5, got 7");
        assert_eq!(HashletError::ReadOnly.to_string(), "read-only filesystem");
    }
}
