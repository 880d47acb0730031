//! Error types for StowDB core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while opening, writing, or compacting a store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backend error.
    #[error("storage error: {0}")]
    Storage(#[from] stowdb_storage::StorageError),

    /// I/O error outside the backend (rename, directory sync, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The data file is not a StowDB file or is damaged.
    #[error("data file corrupted: {message}")]
    Corrupted {
        /// Description of the damage.
        message: String,
    },

    /// A record failed its checksum.
    #[error("checksum mismatch at offset {offset}: stored {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record bytes.
        actual: u32,
    },

    /// The file was written by an incompatible format version.
    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the header.
        found: u16,
        /// Version this build reads and writes.
        supported: u16,
    },

    /// Another handle holds the data file.
    #[error("data file locked by another handle: {}", .path.display())]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// Key is empty or too long.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the key was rejected.
        message: String,
    },

    /// A record does not fit the length field of the format.
    #[error("record of {size} bytes is too large, limit is {max}")]
    RecordTooLarge {
        /// Encoded size of the rejected record.
        size: usize,
        /// Largest encodable record.
        max: usize,
    },

    /// The handle was opened read-only.
    #[error("data file opened read-only")]
    ReadOnly,

    /// The data file was replaced on disk but could not be reopened, so
    /// the handle no longer points at it.
    #[error("data file handle unusable after compaction: {message}")]
    Poisoned {
        /// Why the reopen failed.
        message: String,
    },

    /// A rewrite is already running for this file.
    #[error("compaction already in progress")]
    CompactionInProgress,

    /// Background compaction failed in strict mode.
    #[error("compaction failed: {message}")]
    CompactionFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns true if the error came from the file system.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Storage(stowdb_storage::StorageError::Io(_))
        )
    }

    /// Returns true if the file system ran out of space.
    #[must_use]
    pub fn is_disk_full(&self) -> bool {
        match self {
            Self::Io(e) => stowdb_storage::is_disk_full(e),
            Self::Storage(e) => e.is_disk_full(),
            _ => false,
        }
    }
}
