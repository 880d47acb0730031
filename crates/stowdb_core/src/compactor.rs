//! Compaction on open.
//!
//! [`CompactorEngine`] opens a data file, measures it, asks the caller's
//! [`CompactionPolicy`] whether to compact, and rewrites the file if told
//! to, either before returning or on a background thread.
//!
//! ## Invariants
//!
//! - At most one compaction per open call
//! - A file with `total_bytes == 0` is never handed to the policy
//! - A compaction that fails before its rename never changes the data file
//! - Outside strict mode a failed compaction still yields an open store,
//!   unless the file was replaced and could not be reopened
//!
//! ## Example
//!
//! ```no_run
//! use stowdb_core::{CompactionMode, CompactorEngine, OpenOptions, SizeRatioPolicy};
//! use std::path::Path;
//!
//! let engine = CompactorEngine::new(OpenOptions::new().mode(CompactionMode::Async));
//! let store = engine
//!     .open(Path::new("app.stow"), &SizeRatioPolicy::over_100_mib_half_empty())
//!     .unwrap();
//! store.put(b"key", b"value").unwrap();
//! let outcome = store.wait_for_compaction().unwrap();
//! println!("{outcome:?}");
//! ```

use crate::config::{CompactionMode, OpenOptions};
use crate::error::CoreResult;
use crate::file::StorageFile;
use crate::log::Measurement;
use crate::policy::CompactionPolicy;
use crate::store::Store;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Statistics from one completed compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// File length before the rewrite.
    pub bytes_before: u64,
    /// File length after the rewrite.
    pub bytes_after: u64,
    /// Live records copied into the new file.
    pub records_written: usize,
    /// Writes made during a background compaction and replayed into the
    /// new file.
    pub replayed_writes: usize,
    /// Wall time spent.
    pub duration: Duration,
}

impl CompactionReport {
    /// Bytes reclaimed. Can be zero when writes during a background
    /// compaction outweigh the savings.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// What happened to the open-time compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The policy declined, or the file was empty.
    Skipped(Measurement),
    /// Compaction ran on a background thread and has not finished.
    Running,
    /// The file was compacted.
    Compacted(CompactionReport),
    /// Compaction failed and the store kept the uncompacted file.
    FellBack {
        /// Why compaction failed.
        error: String,
    },
}

impl CompactionOutcome {
    /// Returns true if the file was rewritten.
    #[must_use]
    pub fn is_compacted(&self) -> bool {
        matches!(self, Self::Compacted(_))
    }
}

/// Opens data files and applies a compaction policy.
#[derive(Debug, Clone, Default)]
pub struct CompactorEngine {
    options: OpenOptions,
}

impl CompactorEngine {
    /// Creates an engine with the given options.
    #[must_use]
    pub fn new(options: OpenOptions) -> Self {
        Self { options }
    }

    /// The engine's options.
    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Opens `path`, compacting it first if `policy` says so.
    ///
    /// In [`CompactionMode::Sync`] the rewrite finishes before this returns.
    /// In [`CompactionMode::Async`] the store is returned at once and
    /// [`Store::wait_for_compaction`] reports the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or if a synchronous
    /// compaction fails in strict mode.
    pub fn open<P>(&self, path: &Path, policy: &P) -> CoreResult<Store>
    where
        P: CompactionPolicy + ?Sized,
    {
        let mut file = StorageFile::open_with(path, self.options.create_if_missing)?;
        let measured = file.measure();

        if !Self::evaluate(policy, measured) {
            debug!(
                path = %path.display(),
                total_bytes = measured.total_bytes,
                used_bytes = measured.used_bytes,
                "policy declined compaction"
            );
            return Ok(Store::new(file, CompactionOutcome::Skipped(measured)));
        }

        debug!(
            path = %path.display(),
            total_bytes = measured.total_bytes,
            used_bytes = measured.used_bytes,
            mode = ?self.options.mode,
            "policy requested compaction"
        );

        match self.options.mode {
            CompactionMode::Sync => {
                let outcome = match file.rewrite_compact() {
                    Ok(report) => CompactionOutcome::Compacted(report),
                    Err(e) if self.options.strict || file.is_poisoned() => return Err(e),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            disk_full = e.is_disk_full(),
                            "compaction failed, opening uncompacted file"
                        );
                        CompactionOutcome::FellBack {
                            error: e.to_string(),
                        }
                    }
                };
                Ok(Store::new(file, outcome))
            }
            CompactionMode::Async => Ok(Store::spawn_compaction(file, self.options.strict)),
        }
    }

    fn evaluate<P>(policy: &P, measured: Measurement) -> bool
    where
        P: CompactionPolicy + ?Sized,
    {
        measured.total_bytes > 0 && policy.should_compact(measured.total_bytes, measured.used_bytes)
    }
}

/// Opens `path` with the given policy and mode, non-strict.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn open_with_compaction<P>(path: &Path, policy: &P, mode: CompactionMode) -> CoreResult<Store>
where
    P: CompactionPolicy + ?Sized,
{
    CompactorEngine::new(OpenOptions::new().mode(mode)).open(path, policy)
}
