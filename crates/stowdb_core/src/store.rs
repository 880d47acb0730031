//! The store handle returned by the compactor engine.
//!
//! A [`Store`] owns its [`StorageFile`] behind a lock and is safe to share
//! between threads. When the engine compacts in the background the handle
//! stays usable: every write made while the rewrite runs is appended to the
//! current file as usual and also queued, and the queue is replayed into the
//! compacted file under the write lock just before it replaces the original.
//! If compaction fails the original file already holds every write.

use crate::compactor::{CompactionOutcome, CompactionReport};
use crate::error::{CoreError, CoreResult};
use crate::file::{CompactedOutput, StorageFile};
use crate::log::{Measurement, RecordLocation, VerifyReport};
use crate::record::Record;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use stowdb_storage::{FileBackend, StorageBackend};
use tracing::{info, warn};

struct Shared {
    path: PathBuf,
    file: RwLock<StorageFile>,
    /// `Some` while a background compaction is collecting writes.
    pending: Mutex<Option<Vec<Record>>>,
    rewriting: AtomicBool,
    outcome: Mutex<CompactionOutcome>,
}

/// Exclusive right to rewrite the file; released on drop.
struct RewriteSlot(Arc<Shared>);

impl RewriteSlot {
    fn acquire(shared: &Arc<Shared>) -> CoreResult<Self> {
        shared
            .rewriting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CoreError::CompactionInProgress)?;
        Ok(Self(Arc::clone(shared)))
    }
}

impl Drop for RewriteSlot {
    fn drop(&mut self) {
        self.0.rewriting.store(false, Ordering::Release);
    }
}

/// An open data file.
pub struct Store {
    shared: Arc<Shared>,
    strict: bool,
    task: Mutex<Option<JoinHandle<CoreResult<CompactionReport>>>>,
    strict_failure: Mutex<Option<String>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("outcome", &*self.shared.outcome.lock())
            .finish_non_exhaustive()
    }
}

impl Store {
    pub(crate) fn new(file: StorageFile, outcome: CompactionOutcome) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: file.path().to_path_buf(),
                file: RwLock::new(file),
                pending: Mutex::new(None),
                rewriting: AtomicBool::new(false),
                outcome: Mutex::new(outcome),
            }),
            strict: false,
            task: Mutex::new(None),
            strict_failure: Mutex::new(None),
        }
    }

    /// Starts a background compaction and returns the handle immediately.
    pub(crate) fn spawn_compaction(file: StorageFile, strict: bool) -> Self {
        let mut store = Self::new(file, CompactionOutcome::Running);
        store.strict = strict;

        let slot = match RewriteSlot::acquire(&store.shared) {
            Ok(slot) => slot,
            Err(e) => {
                store.record_failure(&e);
                return store;
            }
        };
        let (snapshot, bytes_before) = arm_queue(&store.shared);

        let spawned = std::thread::Builder::new()
            .name("stowdb-compact".into())
            .spawn(move || {
                let shared = &slot.0;
                let result = compact_in_background(shared, snapshot, bytes_before);
                *shared.outcome.lock() = match &result {
                    Ok(report) => CompactionOutcome::Compacted(report.clone()),
                    Err(e) => {
                        warn!(
                            path = %shared.path.display(),
                            error = %e,
                            disk_full = e.is_disk_full(),
                            "background compaction failed"
                        );
                        CompactionOutcome::FellBack {
                            error: e.to_string(),
                        }
                    }
                };
                result
            });

        match spawned {
            Ok(handle) => *store.task.lock() = Some(handle),
            Err(e) => {
                let guard = store.shared.file.write();
                store.shared.pending.lock().take();
                drop(guard);
                store.record_failure(&CoreError::from(e));
            }
        }
        store
    }

    fn record_failure(&self, error: &CoreError) {
        let message = error.to_string();
        *self.shared.outcome.lock() = CompactionOutcome::FellBack {
            error: message.clone(),
        };
        if self.strict {
            *self.strict_failure.lock() = Some(message);
        }
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Current size accounting.
    #[must_use]
    pub fn measure(&self) -> Measurement {
        self.shared.file.read().measure()
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.shared.file.read().get(key)
    }

    /// Returns true if `key` is live.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.shared.file.read().contains(key)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.file.read().len()
    }

    /// Returns true if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.file.read().is_empty()
    }

    /// Live keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.shared.file.read().keys()
    }

    /// Stores `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        let mut file = self.shared.file.write();
        let record = file.put(key, value)?;
        queue_write(&self.shared, record);
        Ok(())
    }

    /// Deletes `key`. Returns true if it was live.
    pub fn delete(&self, key: &[u8]) -> CoreResult<bool> {
        let mut file = self.shared.file.write();
        match file.delete(key)? {
            Some(tombstone) => {
                queue_write(&self.shared, tombstone);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pushes buffered writes to the OS.
    pub fn flush(&self) -> CoreResult<()> {
        self.shared.file.write().flush()
    }

    /// Forces writes to stable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.shared.file.write().sync()
    }

    /// Rescans the file and checks every record.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.shared.file.read().verify()
    }

    /// Compacts now, blocking until done.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompactionInProgress`] while a background
    /// compaction runs, or the rewrite's I/O error.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        let _slot = RewriteSlot::acquire(&self.shared)?;
        self.shared.file.write().rewrite_compact()
    }

    /// Returns true while a compaction runs.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.shared.rewriting.load(Ordering::Acquire)
    }

    /// State of the open-time compaction, without waiting.
    #[must_use]
    pub fn compaction_outcome(&self) -> CompactionOutcome {
        self.shared.outcome.lock().clone()
    }

    /// Blocks until the open-time compaction finishes and returns its
    /// outcome. Returns at once if it already finished or never ran.
    ///
    /// # Errors
    ///
    /// In strict mode a failed compaction is an error. The first call
    /// returns the original error, later calls a
    /// [`CoreError::CompactionFailed`] carrying its message.
    pub fn wait_for_compaction(&self) -> CoreResult<CompactionOutcome> {
        let task = self.task.lock().take();
        if let Some(handle) = task {
            let result = handle.join().unwrap_or_else(|_| {
                Err(CoreError::CompactionFailed {
                    message: "compaction thread panicked".into(),
                })
            });
            if let Err(e) = result {
                {
                    let mut outcome = self.shared.outcome.lock();
                    if matches!(*outcome, CompactionOutcome::Running) {
                        *outcome = CompactionOutcome::FellBack {
                            error: e.to_string(),
                        };
                    }
                }
                if self.strict {
                    *self.strict_failure.lock() = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        if let Some(message) = self.strict_failure.lock().clone() {
            return Err(CoreError::CompactionFailed { message });
        }
        Ok(self.compaction_outcome())
    }
}

/// Queues `record` for replay if a background compaction is collecting.
/// Caller holds the file write lock.
fn queue_write(shared: &Shared, record: Record) {
    if let Some(pending) = shared.pending.lock().as_mut() {
        pending.push(record);
    }
}

/// Takes the live-record snapshot and starts queueing writes, atomically
/// with respect to writers.
fn arm_queue(shared: &Shared) -> (Vec<RecordLocation>, u64) {
    let file = shared.file.write();
    *shared.pending.lock() = Some(Vec::new());
    (file.live_locations(), file.measure().total_bytes)
}

fn compact_in_background(
    shared: &Shared,
    snapshot: Vec<RecordLocation>,
    bytes_before: u64,
) -> CoreResult<CompactionReport> {
    let result = copy_and_install(shared, &snapshot, bytes_before);
    if result.is_err() {
        let _file = shared.file.write();
        shared.pending.lock().take();
    }
    result
}

fn copy_and_install(
    shared: &Shared,
    snapshot: &[RecordLocation],
    bytes_before: u64,
) -> CoreResult<CompactionReport> {
    let started = Instant::now();

    // Records at snapshot offsets never move while the original file is in
    // place, so a separate read handle can copy them without the lock.
    let reader = FileBackend::open_existing(&shared.path)?;
    let mut output = CompactedOutput::create(&shared.path)?;
    if let Err(e) = copy_snapshot(&reader, snapshot, &mut output) {
        output.discard();
        return Err(e);
    }

    let mut file = shared.file.write();
    let pending = shared.pending.lock().take().unwrap_or_default();
    for record in &pending {
        if let Err(e) = output.append(record) {
            output.discard();
            return Err(e);
        }
    }
    output.commit()?;
    file.adopt_replacement()?;

    let report = CompactionReport {
        bytes_before,
        bytes_after: file.measure().total_bytes,
        records_written: snapshot.len(),
        replayed_writes: pending.len(),
        duration: started.elapsed(),
    };
    info!(
        path = %shared.path.display(),
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        records = report.records_written,
        replayed = report.replayed_writes,
        "background compaction finished"
    );
    Ok(report)
}

fn copy_snapshot(
    reader: &FileBackend,
    snapshot: &[RecordLocation],
    output: &mut CompactedOutput,
) -> CoreResult<()> {
    for location in snapshot {
        let bytes = reader.read_at(location.offset, location.len as usize)?;
        output.append(&Record::decode(&bytes, location.offset)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::compact_path;
    use std::fs;
    use tempfile::tempdir;

    fn open_store(path: &Path) -> Store {
        let mut file = StorageFile::open(path).unwrap();
        for round in 0..3u8 {
            for key in 0..6u8 {
                file.put(&[b's', key], &[round; 32]).unwrap();
            }
        }
        file.sync().unwrap();
        Store::new(file, CompactionOutcome::Skipped(Measurement {
            total_bytes: 0,
            used_bytes: 0,
        }))
    }

    #[test]
    fn writes_without_compaction_are_not_queued() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("app.stow"));

        store.put(b"plain", b"write").unwrap();
        assert!(store.shared.pending.lock().is_none());
        assert_eq!(store.get(b"plain").unwrap().unwrap(), b"write");
        assert!(store.delete(b"plain").unwrap());
        assert!(!store.delete(b"plain").unwrap());
    }

    #[test]
    fn queued_writes_are_replayed_exactly_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let store = open_store(&path);

        let (snapshot, bytes_before) = arm_queue(&store.shared);
        assert_eq!(snapshot.len(), 6);

        // writes that arrive while the rewrite is in flight
        store.put(b"new", b"during").unwrap();
        store.put(&[b's', 0], b"overwritten").unwrap();
        assert!(store.delete(&[b's', 5]).unwrap());
        assert_eq!(store.shared.pending.lock().as_ref().unwrap().len(), 3);

        let report = compact_in_background(&store.shared, snapshot, bytes_before).unwrap();
        assert_eq!(report.records_written, 6);
        assert_eq!(report.replayed_writes, 3);
        assert!(store.shared.pending.lock().is_none());

        assert_eq!(store.get(b"new").unwrap().unwrap(), b"during");
        assert_eq!(store.get(&[b's', 0]).unwrap().unwrap(), b"overwritten");
        assert!(!store.contains(&[b's', 5]));
        assert_eq!(store.len(), 6);

        // six snapshot records plus three replayed, nothing applied twice
        let verified = store.verify().unwrap();
        assert_eq!(verified.records, 9);
        assert_eq!(report.bytes_after, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn failed_background_rewrite_disarms_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let store = open_store(&path);
        fs::create_dir(compact_path(&path)).unwrap();

        let (snapshot, bytes_before) = arm_queue(&store.shared);
        store.put(b"late", b"write").unwrap();
        let before = fs::read(&path).unwrap();

        let err = compact_in_background(&store.shared, snapshot, bytes_before).unwrap_err();
        assert!(err.is_io());
        assert!(store.shared.pending.lock().is_none());
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.get(b"late").unwrap().unwrap(), b"write");
    }

    #[test]
    fn store_refuses_writes_once_replacement_is_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        let store = open_store(&path);

        // the data file vanishes between the rename and the reopen
        fs::remove_file(&path).unwrap();
        let err = store.shared.file.write().adopt_replacement().unwrap_err();
        assert!(matches!(err, CoreError::Poisoned { .. }));

        assert!(matches!(
            store.put(b"lost", b"write"),
            Err(CoreError::Poisoned { .. })
        ));
        assert!(matches!(store.delete(&[b's', 0]), Err(CoreError::Poisoned { .. })));
        assert!(matches!(store.sync(), Err(CoreError::Poisoned { .. })));
        assert!(matches!(store.compact(), Err(CoreError::Poisoned { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn manual_compaction_respects_slot() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("app.stow"));

        let slot = RewriteSlot::acquire(&store.shared).unwrap();
        assert!(store.is_compacting());
        assert!(matches!(
            store.compact(),
            Err(CoreError::CompactionInProgress)
        ));
        drop(slot);

        let report = store.compact().unwrap();
        assert_eq!(report.records_written, 6);
        assert!(!store.is_compacting());
        let m = store.measure();
        assert_eq!(m.used_bytes, m.total_bytes);
    }

    #[test]
    fn wait_without_background_task_returns_outcome() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("app.stow"));
        assert!(matches!(
            store.wait_for_compaction().unwrap(),
            CompactionOutcome::Skipped(_)
        ));
    }
}
