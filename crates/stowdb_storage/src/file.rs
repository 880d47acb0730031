//! Single-file backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct Inner {
    file: File,
    len: u64,
    writable: bool,
}

/// A backend over one OS file.
///
/// The file handle and the cached length sit behind a single mutex, so a
/// seek-then-read can never interleave with an append from another thread.
///
/// `flush` hands buffered bytes to the OS; `sync` calls `File::sync_all`.
///
/// ```no_run
/// use stowdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("app.stow")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileBackend {
    /// Opens the file at `path`, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Opens an existing file without creating it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing exists at `path`.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
                _ => StorageError::Io(e),
            })?;
        Self::from_file(path, file)
    }

    /// Opens an existing file for reading only.
    ///
    /// Appends and truncations fail with a permission error and the file on
    /// disk is never modified.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing exists at `path`.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
                _ => StorageError::Io(e),
            })?;
        let mut backend = Self::from_file(path, file)?;
        backend.inner.get_mut().writable = false;
        Ok(backend)
    }

    /// Creates `path` as a fresh empty file, discarding any previous content.
    ///
    /// Compaction writes its output through this before renaming it into
    /// place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                file,
                len,
                writable: true,
            }),
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns false for a backend from [`FileBackend::open_read_only`].
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.inner.lock().writable
    }
}

impl Inner {
    fn check_writable(&self) -> StorageResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StorageError::Io(std::io::Error::new(
                ErrorKind::PermissionDenied,
                "backend opened read-only",
            )))
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        inner.check_writable()?;
        let offset = inner.len;
        if data.is_empty() {
            return Ok(offset);
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        inner.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().len)
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        inner.check_writable()?;
        if new_len > inner.len {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_len,
                size: inner.len,
            });
        }
        inner.file.set_len(new_len)?;
        inner.file.sync_all()?;
        inner.len = new_len;
        Ok(())
    }
}
