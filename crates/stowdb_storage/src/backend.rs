//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Offsets are absolute byte positions from the start of the store. The
/// store never interprets the bytes it holds.
///
/// # Invariants
///
/// - `append` returns the offset the data landed at, which equals the
///   previous `len()`
/// - bytes returned by `read_at` are exactly the bytes appended there
/// - after `sync` returns, everything appended before it survives a crash
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current length of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn len(&self) -> StorageResult<u64>;

    /// Returns true if the store holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrinks the store to `new_len` bytes. Used to drop a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_len` is
    /// larger than the current length, or an I/O error.
    fn truncate(&mut self, new_len: u64) -> StorageResult<()>;

    /// Reads the whole store into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let len = self.len()?;
        self.read_at(0, len as usize)
    }
}
