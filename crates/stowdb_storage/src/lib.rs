//! # StowDB Storage
//!
//! Byte-store backends underneath a StowDB data file.
//!
//! A backend knows nothing about records, headers, or compaction. It reads
//! ranges, appends, truncates, and makes data durable. The record log in
//! `stowdb_core` owns the file format on top of it.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, used for data files and the
//!   temporary file written during compaction
//! - [`InMemoryBackend`] - a growable buffer for tests and scratch logs
//!
//! ## Example
//!
//! ```rust
//! use stowdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"stow").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"stow");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{is_disk_full, StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
