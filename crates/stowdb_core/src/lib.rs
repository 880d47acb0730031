//! # StowDB Core
//!
//! An embedded key/value data file that can compact itself when opened.
//!
//! A data file is an append-only log: overwrites and deletes leave the old
//! bytes behind as slack. Each file tracks two numbers, its total size and
//! the bytes still live, and the caller decides through a
//! [`CompactionPolicy`] whether a file is worth rewriting when it is opened.
//!
//! ## Architecture
//!
//! - [`StorageFile`] - one data file: record log, key index, size accounting,
//!   atomic rewrite
//! - [`CompactionPolicy`] - pure `(total, used) -> bool` decision
//! - [`CompactorEngine`] - open, measure, consult the policy, compact in the
//!   foreground or on a background thread
//! - [`Store`] - the thread-safe handle the engine returns
//!
//! ## Key Invariants
//!
//! - `used_bytes <= total_bytes` at all times
//! - A failed rewrite leaves the data file byte-identical
//! - Writes made during a background compaction survive it exactly once
//! - One writer per data file, enforced with an advisory lock file
//!
//! ## Example
//!
//! ```no_run
//! use stowdb_core::{open_with_compaction, CompactionMode, SizeRatioPolicy};
//! use std::path::Path;
//!
//! let store = open_with_compaction(
//!     Path::new("app.stow"),
//!     &SizeRatioPolicy::over_100_mib_half_empty(),
//!     CompactionMode::Sync,
//! )?;
//! store.put(b"todo:1", b"Keep it safe")?;
//! # Ok::<(), stowdb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compactor;
mod config;
mod error;
mod file;
mod log;
mod policy;
mod record;
mod store;

pub use compactor::{open_with_compaction, CompactionOutcome, CompactionReport, CompactorEngine};
pub use config::{CompactionMode, OpenOptions};
pub use error::{CoreError, CoreResult};
pub use file::{compact_path, lock_path, StorageFile};
pub use log::{Measurement, RecordLocation, RecordLog, VerifyReport};
pub use policy::{CompactionPolicy, SizeRatioPolicy};
pub use record::{Record, FORMAT_VERSION, HEADER_LEN, MAX_KEY_LEN};
pub use store::Store;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
