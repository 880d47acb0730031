//! A data file on disk.
//!
//! ```text
//! <dir>/
//! ├─ app.stow            # header + record log
//! ├─ app.stow.lock       # advisory lock, held while a handle is open
//! └─ app.stow.compact    # compaction output, exists only during a rewrite
//! ```

use crate::compactor::CompactionReport;
use crate::error::{CoreError, CoreResult};
use crate::log::{Measurement, RecordLocation, RecordLog, VerifyReport};
use crate::record::Record;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use stowdb_storage::FileBackend;
use tracing::{debug, error, info, warn};

const LOCK_SUFFIX: &str = ".lock";
const COMPACT_SUFFIX: &str = ".compact";

/// Returns `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Path of the temporary file compaction writes for `path`.
#[must_use]
pub fn compact_path(path: &Path) -> PathBuf {
    sibling(path, COMPACT_SUFFIX)
}

/// Path of the lock file guarding `path`.
#[must_use]
pub fn lock_path(path: &Path) -> PathBuf {
    sibling(path, LOCK_SUFFIX)
}

/// An open data file.
///
/// A writable handle holds an exclusive advisory lock on `<path>.lock` for
/// its whole lifetime, so only one handle, in any process, writes a given
/// file. A read-only handle takes a shared lock if the lock file exists and
/// never creates it.
#[derive(Debug)]
pub struct StorageFile {
    path: PathBuf,
    log: RecordLog<FileBackend>,
    _lock: Option<File>,
    poisoned: Option<String>,
}

impl StorageFile {
    /// Opens the data file at `path`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is inaccessible, corrupt, or locked by
    /// another handle.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with(path, true)
    }

    /// Opens the data file at `path`.
    ///
    /// # Errors
    ///
    /// As [`StorageFile::open`], plus a not-found error when
    /// `create_if_missing` is false and nothing exists at `path`.
    pub fn open_with(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        let backend = if create_if_missing {
            FileBackend::open(path)?
        } else {
            FileBackend::open_existing(path)?
        };

        let lock_path = lock_path(path);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked { path: lock_path });
        }

        discard_stale_output(path);

        let log = RecordLog::open(backend)?;
        let file = Self {
            path: path.to_path_buf(),
            log,
            _lock: Some(lock),
            poisoned: None,
        };
        debug!(path = %path.display(), keys = file.len(), "opened data file");
        Ok(file)
    }

    /// Opens an existing data file without modifying anything on disk.
    ///
    /// A torn trailing record is reported by
    /// [`StorageFile::torn_tail_bytes`] instead of being truncated, leftover
    /// compaction output is left alone, and no lock file is created. Writes
    /// and compaction fail with [`CoreError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns a not-found error if nothing exists at `path`,
    /// [`CoreError::Locked`] while a writable handle is open, or a
    /// corruption error.
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        let backend = FileBackend::open_read_only(path)?;

        let lock_path = lock_path(path);
        let lock = match File::open(&lock_path) {
            Ok(lock) => {
                if lock.try_lock_shared().is_err() {
                    return Err(CoreError::Locked { path: lock_path });
                }
                Some(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let log = RecordLog::open_read_only(backend)?;
        let file = Self {
            path: path.to_path_buf(),
            log,
            _lock: lock,
            poisoned: None,
        };
        debug!(path = %path.display(), keys = file.len(), "opened data file read-only");
        Ok(file)
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size accounting: file length and live bytes. Reads nothing from disk.
    #[must_use]
    pub fn measure(&self) -> Measurement {
        self.log.measure()
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.log.get(key)
    }

    /// Stores `value` under `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<Record> {
        self.writable()?;
        self.log.put(key, value)
    }

    /// Deletes `key`, returning the tombstone if one was written.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<Option<Record>> {
        self.writable()?;
        self.log.delete(key)
    }

    /// Returns true if the handle was opened with
    /// [`StorageFile::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.log.is_read_only()
    }

    /// Returns true once a compaction replaced the file on disk but the
    /// handle could not reopen it. A poisoned handle refuses writes.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Bytes of a torn trailing record seen by a read-only open.
    #[must_use]
    pub fn torn_tail_bytes(&self) -> u64 {
        self.log.torn_tail_bytes()
    }

    fn writable(&self) -> CoreResult<()> {
        self.check_poisoned()?;
        if self.log.is_read_only() {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    /// Returns true if `key` is live.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.log.contains(key)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Returns true if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Live keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.log.keys()
    }

    /// Pushes buffered writes to the OS.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.check_poisoned()?;
        self.log.flush()
    }

    /// Forces writes to stable storage.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.check_poisoned()?;
        self.log.sync()
    }

    fn check_poisoned(&self) -> CoreResult<()> {
        match &self.poisoned {
            Some(message) => Err(CoreError::Poisoned {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Rescans the file and checks every record.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.log.verify()
    }

    pub(crate) fn live_locations(&self) -> Vec<RecordLocation> {
        self.log.live_locations()
    }

    /// Rewrites the file so it holds only live records.
    ///
    /// Output goes to `<path>.compact`, is fsynced, then renamed over the
    /// data file. If anything fails before the rename the data file is left
    /// exactly as it was. Afterwards `used_bytes == total_bytes`.
    ///
    /// Once the rename succeeds the handle always switches to the new file.
    /// If it cannot, the handle is poisoned and every later write fails
    /// with [`CoreError::Poisoned`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error on disk exhaustion, permission failure, or a
    /// failed rename, [`CoreError::ReadOnly`] on a read-only handle, and
    /// [`CoreError::Poisoned`] if the renamed file could not be reopened.
    pub fn rewrite_compact(&mut self) -> CoreResult<CompactionReport> {
        self.writable()?;
        let started = Instant::now();
        let before = self.measure();

        let mut output = CompactedOutput::create(&self.path)?;
        let written = match self.copy_live_into(&mut output) {
            Ok(n) => n,
            Err(e) => {
                output.discard();
                return Err(e);
            }
        };
        output.commit()?;
        self.adopt_replacement()?;

        let report = CompactionReport {
            bytes_before: before.total_bytes,
            bytes_after: self.measure().total_bytes,
            records_written: written,
            replayed_writes: 0,
            duration: started.elapsed(),
        };
        info!(
            path = %self.path.display(),
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            records = report.records_written,
            "compacted data file"
        );
        Ok(report)
    }

    fn copy_live_into(&self, output: &mut CompactedOutput) -> CoreResult<usize> {
        let locations = self.live_locations();
        for location in &locations {
            output.append(&self.log.read_record(*location)?)?;
        }
        Ok(locations.len())
    }

    /// Reopens the log after compaction renamed its output over the data
    /// file. On failure the old log still points at the unlinked file, so
    /// the handle is poisoned.
    pub(crate) fn adopt_replacement(&mut self) -> CoreResult<()> {
        let reopened = FileBackend::open_existing(&self.path)
            .map_err(CoreError::from)
            .and_then(RecordLog::open);
        match reopened {
            Ok(log) => {
                self.log = log;
                Ok(())
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "could not reopen compacted data file, refusing further writes"
                );
                let message = e.to_string();
                self.poisoned = Some(message.clone());
                Err(CoreError::Poisoned { message })
            }
        }
    }
}

fn discard_stale_output(path: &Path) {
    let stale = compact_path(path);
    if stale.is_file() {
        warn!(path = %stale.display(), "removing leftover compaction output");
        if let Err(e) = fs::remove_file(&stale) {
            warn!(error = %e, "could not remove leftover compaction output");
        }
    }
}

/// The temporary file a compaction writes into.
pub(crate) struct CompactedOutput {
    data_path: PathBuf,
    temp_path: PathBuf,
    log: RecordLog<FileBackend>,
}

impl CompactedOutput {
    pub(crate) fn create(data_path: &Path) -> CoreResult<Self> {
        let temp_path = compact_path(data_path);
        let log = RecordLog::open(FileBackend::create_new(&temp_path)?)?;
        Ok(Self {
            data_path: data_path.to_path_buf(),
            temp_path,
            log,
        })
    }

    pub(crate) fn append(&mut self, record: &Record) -> CoreResult<()> {
        self.log.append_record(record).map(|_| ())
    }

    /// Fsyncs the output and renames it over the data file.
    ///
    /// Returns an error only if the data file was not replaced. A failed
    /// directory fsync after the rename is logged.
    pub(crate) fn commit(mut self) -> CoreResult<()> {
        let renamed = self
            .log
            .sync()
            .and_then(|()| Ok(fs::rename(&self.temp_path, &self.data_path)?));
        if let Err(e) = renamed {
            remove_if_file(&self.temp_path);
            return Err(e);
        }
        if let Err(e) = sync_parent_dir(&self.data_path) {
            warn!(
                path = %self.data_path.display(),
                error = %e,
                "compacted file renamed into place but its directory was not synced"
            );
        }
        Ok(())
    }

    /// Drops the output without touching the data file.
    pub(crate) fn discard(self) {
        remove_if_file(&self.temp_path);
    }
}

fn remove_if_file(path: &Path) {
    if path.is_file() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove compaction output");
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> CoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> CoreResult<()> {
    // directory handles cannot be fsynced here
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HEADER_LEN;
    use tempfile::tempdir;

    fn churned(path: &Path) -> StorageFile {
        let mut file = StorageFile::open(path).unwrap();
        for round in 0..5u8 {
            for key in 0..20u8 {
                file.put(&[b'k', key], &vec![round; 64]).unwrap();
            }
        }
        for key in 10..20u8 {
            file.delete(&[b'k', key]).unwrap();
        }
        file.sync().unwrap();
        file
    }

    #[test]
    fn open_creates_file_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");

        let file = StorageFile::open(&path).unwrap();
        assert_eq!(file.measure().total_bytes, HEADER_LEN);
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
        assert!(lock_path(&path).exists());
    }

    #[test]
    fn open_without_create_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.stow");

        let err = StorageFile::open_with(&path, false).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Storage(stowdb_storage::StorageError::NotFound(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn second_handle_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");

        let _first = StorageFile::open(&path).unwrap();
        let err = StorageFile::open(&path).unwrap_err();
        assert!(matches!(err, CoreError::Locked { .. }));
    }

    #[test]
    fn corrupt_file_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        fs::write(&path, b"definitely not a data file").unwrap();

        assert!(matches!(
            StorageFile::open(&path),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn measure_is_idempotent() {
        let dir = tempdir().unwrap();
        let file = churned(&dir.path().join("app.stow"));

        let first = file.measure();
        assert_eq!(file.measure(), first);
        assert!(first.used_bytes <= first.total_bytes);
        assert_eq!(first.total_bytes, fs::metadata(file.path()).unwrap().len());
    }

    #[test]
    fn rewrite_leaves_no_slack_and_keeps_live_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let mut file = churned(&path);
        let before = file.measure();

        let report = file.rewrite_compact().unwrap();
        let after = file.measure();

        assert_eq!(after.used_bytes, after.total_bytes);
        assert_eq!(after.used_bytes, before.used_bytes);
        assert_eq!(report.bytes_before, before.total_bytes);
        assert_eq!(report.bytes_after, after.total_bytes);
        assert_eq!(report.records_written, 10);
        assert_eq!(file.len(), 10);
        for key in 0..10u8 {
            assert_eq!(file.get(&[b'k', key]).unwrap().unwrap(), vec![4u8; 64]);
        }
        for key in 10..20u8 {
            assert!(!file.contains(&[b'k', key]));
        }
        assert!(!compact_path(&path).exists());
    }

    #[test]
    fn rewrite_is_idempotent_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let mut file = churned(&path);

        file.rewrite_compact().unwrap();
        let once = fs::read(&path).unwrap();
        file.rewrite_compact().unwrap();
        let twice = fs::read(&path).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn failed_rewrite_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let mut file = churned(&path);
        let original = fs::read(&path).unwrap();
        let measured = file.measure();

        // a directory where the output file should go makes the rewrite fail
        fs::create_dir(compact_path(&path)).unwrap();

        let err = file.rewrite_compact().unwrap_err();
        assert!(err.is_io());
        assert_eq!(fs::read(&path).unwrap(), original);
        assert_eq!(file.measure(), measured);
        assert_eq!(file.get(b"k\x03").unwrap().unwrap(), vec![4u8; 64]);
        assert!(compact_path(&path).is_dir());
    }

    #[test]
    fn writes_after_rewrite_land_in_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        {
            let mut file = churned(&path);
            file.rewrite_compact().unwrap();
            file.put(b"fresh", b"value").unwrap();
            file.sync().unwrap();
        }

        let reopened = StorageFile::open(&path).unwrap();
        assert_eq!(reopened.get(b"fresh").unwrap().unwrap(), b"value");
        assert_eq!(reopened.len(), 11);
    }

    #[test]
    fn damaged_length_fails_open_without_truncating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        {
            let mut file = StorageFile::open(&path).unwrap();
            for key in 0..10u8 {
                file.put(&[b'k', key], &[key; 32]).unwrap();
            }
            file.sync().unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN as usize + 3] = 0x7f;
        fs::write(&path, &bytes).unwrap();

        let err = StorageFile::open(&path).unwrap_err();
        assert!(matches!(err, CoreError::Corrupted { .. }), "{err}");
        assert_eq!(fs::read(&path).unwrap(), bytes);

        assert!(matches!(
            StorageFile::open_read_only(&path),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn read_only_open_changes_nothing_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        {
            let mut file = StorageFile::open(&path).unwrap();
            file.put(b"key", b"value").unwrap();
            file.sync().unwrap();
        }
        fs::remove_file(lock_path(&path)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x40, 0, 0, 0, 0, 0]);
        fs::write(&path, &bytes).unwrap();
        fs::write(compact_path(&path), b"half-written").unwrap();

        let mut file = StorageFile::open_read_only(&path).unwrap();
        assert!(file.is_read_only());
        assert_eq!(file.torn_tail_bytes(), 6);
        assert_eq!(file.get(b"key").unwrap().unwrap(), b"value");
        let report = file.verify().unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.torn_tail_bytes, 6);

        assert!(matches!(file.put(b"k", b"v"), Err(CoreError::ReadOnly)));
        assert!(matches!(file.rewrite_compact(), Err(CoreError::ReadOnly)));
        drop(file);

        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert!(!lock_path(&path).exists());
        assert!(compact_path(&path).exists());
    }

    #[test]
    fn read_only_open_waits_for_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");

        let writer = StorageFile::open(&path).unwrap();
        assert!(matches!(
            StorageFile::open_read_only(&path),
            Err(CoreError::Locked { .. })
        ));
        drop(writer);

        let _reader = StorageFile::open_read_only(&path).unwrap();
        let _second = StorageFile::open_read_only(&path).unwrap();
        assert!(matches!(StorageFile::open(&path), Err(CoreError::Locked { .. })));
    }

    #[test]
    fn lost_replacement_poisons_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let mut file = churned(&path);

        fs::remove_file(&path).unwrap();
        let err = file.adopt_replacement().unwrap_err();
        assert!(matches!(err, CoreError::Poisoned { .. }));
        assert!(file.is_poisoned());

        assert!(matches!(file.put(b"k", b"v"), Err(CoreError::Poisoned { .. })));
        assert!(matches!(file.delete(b"k\x01"), Err(CoreError::Poisoned { .. })));
        assert!(matches!(file.flush(), Err(CoreError::Poisoned { .. })));
        assert!(matches!(file.rewrite_compact(), Err(CoreError::Poisoned { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn commit_replaces_data_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        drop(churned(&path));

        let mut output = CompactedOutput::create(&path).unwrap();
        output
            .append(&Record::put(b"only".to_vec(), b"one".to_vec(), 1))
            .unwrap();
        output.commit().unwrap();

        assert!(!compact_path(&path).exists());
        let file = StorageFile::open(&path).unwrap();
        assert_eq!(file.keys(), vec![b"only".to_vec()]);
    }

    #[test]
    fn leftover_output_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        drop(StorageFile::open(&path).unwrap());
        fs::write(compact_path(&path), b"half-written").unwrap();

        let _file = StorageFile::open(&path).unwrap();
        assert!(!compact_path(&path).exists());
    }
}
