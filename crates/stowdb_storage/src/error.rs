//! Error types for backend operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The operating system reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read touched bytes past the end of the store.
    #[error("read past end: offset {offset}, len {len}, store size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Size of the store at the time of the read.
        size: u64,
    },

    /// A truncation asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// The file was expected to exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl StorageError {
    /// Returns true when the underlying cause is the disk running out of space.
    #[must_use]
    pub fn is_disk_full(&self) -> bool {
        match self {
            Self::Io(e) => is_disk_full(e),
            _ => false,
        }
    }
}

/// Returns true if `error` reports an exhausted file system.
#[must_use]
pub fn is_disk_full(error: &io::Error) -> bool {
    #[cfg(unix)]
    const CODES: &[i32] = &[28]; // ENOSPC
    #[cfg(windows)]
    const CODES: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
    #[cfg(not(any(unix, windows)))]
    const CODES: &[i32] = &[];

    error.raw_os_error().is_some_and(|code| CODES.contains(&code))
}
