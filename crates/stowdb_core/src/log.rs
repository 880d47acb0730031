//! Append-only record log with an in-memory key index.
//!
//! The log sits on any [`StorageBackend`]. Opening it scans every record,
//! keeps the newest record per key, and tracks how many bytes of the file
//! are still live. That number is what a compaction policy sees as
//! `used_bytes`.

use crate::error::{CoreError, CoreResult};
use crate::record::{
    decode_header, encode_header, find_record, plausible_prefix, read_len, validate_key, Record,
    HEADER_LEN, MIN_RECORD_LEN,
};
use std::collections::BTreeMap;
use stowdb_storage::StorageBackend;
use tracing::{debug, warn};

/// Size accounting for a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Bytes the file occupies, live data plus slack.
    pub total_bytes: u64,
    /// Bytes taken by the header and the newest non-deleted record per key.
    pub used_bytes: u64,
}

impl Measurement {
    /// Fraction of the file that is live, or 1.0 for an empty file.
    #[must_use]
    pub fn live_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }

    /// Bytes compaction would reclaim.
    #[must_use]
    pub fn reclaimable_bytes(&self) -> u64 {
        self.total_bytes - self.used_bytes
    }
}

/// Where a record lives in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Byte offset of the record.
    pub offset: u64,
    /// Encoded length of the record.
    pub len: u32,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    location: RecordLocation,
    sequence: u64,
    tombstone: bool,
}

/// Result of a full checksum pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Records scanned.
    pub records: usize,
    /// Tombstones among them.
    pub tombstones: usize,
    /// Records superseded by a newer write to the same key.
    pub superseded: usize,
    /// Bytes scanned after the header.
    pub bytes_scanned: u64,
    /// Bytes of a trailing record cut short by a crash. Only a read-only
    /// handle sees these; a writable open truncates them.
    pub torn_tail_bytes: u64,
}

/// A record log over a backend.
#[derive(Debug)]
pub struct RecordLog<B: StorageBackend> {
    backend: B,
    index: BTreeMap<Vec<u8>, IndexEntry>,
    total_bytes: u64,
    live_bytes: u64,
    next_sequence: u64,
    read_only: bool,
    torn_tail_bytes: u64,
}

impl<B: StorageBackend> RecordLog<B> {
    /// Opens a log, writing a header into an empty backend.
    ///
    /// A trailing record that was cut short by a crash is truncated away.
    /// A record whose length runs past the end of the file while a valid
    /// record still follows it is corruption, not a torn write, and fails
    /// the open without touching the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid, a record fails its
    /// checksum, or the backend fails.
    pub fn open(mut backend: B) -> CoreResult<Self> {
        if backend.is_empty()? {
            backend.append(&encode_header())?;
            backend.sync()?;
        }
        Self::load(backend, false)
    }

    /// Opens a log without ever writing to the backend.
    ///
    /// A torn trailing record is left in place and reported by
    /// [`RecordLog::torn_tail_bytes`]. Every write method fails with
    /// [`CoreError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// As [`RecordLog::open`]; an empty backend has no header and is
    /// reported as corrupted.
    pub fn open_read_only(backend: B) -> CoreResult<Self> {
        Self::load(backend, true)
    }

    fn load(backend: B, read_only: bool) -> CoreResult<Self> {
        let mut log = Self {
            backend,
            index: BTreeMap::new(),
            total_bytes: 0,
            live_bytes: 0,
            next_sequence: 1,
            read_only,
            torn_tail_bytes: 0,
        };
        log.rebuild()?;
        Ok(log)
    }

    fn rebuild(&mut self) -> CoreResult<()> {
        let size = self.backend.len()?;
        if size < HEADER_LEN {
            return Err(CoreError::corrupted("file shorter than header"));
        }
        decode_header(&self.backend.read_at(0, HEADER_LEN as usize)?)?;

        let mut offset = HEADER_LEN;
        let mut max_sequence = 0u64;
        while offset < size {
            let Some(len) = self.record_len_at(offset, size)? else {
                self.check_torn_tail(offset, size)?;
                if self.read_only {
                    warn!(offset, size, "data file ends in a torn record");
                    self.torn_tail_bytes = size - offset;
                } else {
                    warn!(offset, size, "truncating torn record at end of data file");
                    self.backend.truncate(offset)?;
                }
                break;
            };
            let record = Record::decode(&self.backend.read_at(offset, len as usize)?, offset)?;
            max_sequence = max_sequence.max(record.sequence);
            self.index_record(record, RecordLocation { offset, len });
            offset += u64::from(len);
        }

        self.total_bytes = self.backend.len()?;
        self.next_sequence = max_sequence + 1;
        debug!(
            keys = self.len(),
            total_bytes = self.total_bytes,
            used_bytes = self.used_bytes(),
            "record log indexed"
        );
        Ok(())
    }

    /// Length of the record at `offset`, or `None` if it runs past `size`.
    fn record_len_at(&self, offset: u64, size: u64) -> CoreResult<Option<u32>> {
        if offset + 4 > size {
            return Ok(None);
        }
        let len = read_len(&self.backend.read_at(offset, 4)?);
        if (len as usize) < MIN_RECORD_LEN {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} declares impossible length {len}"
            )));
        }
        if offset + u64::from(len) > size {
            return Ok(None);
        }
        Ok(Some(len))
    }

    /// Fails unless the bytes from `offset` to `size` look like a single
    /// record whose write was cut short.
    fn check_torn_tail(&self, offset: u64, size: u64) -> CoreResult<()> {
        let tail = self.backend.read_at(offset, (size - offset) as usize)?;
        if !plausible_prefix(&tail) {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} has a damaged header and runs past end of file"
            )));
        }
        if let Some(at) = tail.get(1..).and_then(find_record) {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} runs past end of file but a valid record follows at offset {}",
                offset + 1 + at as u64
            )));
        }
        Ok(())
    }

    fn index_record(&mut self, record: Record, location: RecordLocation) {
        let entry = IndexEntry {
            location,
            sequence: record.sequence,
            tombstone: record.tombstone,
        };
        match self.index.get_mut(&record.key) {
            Some(existing) if existing.sequence > record.sequence => {}
            Some(existing) => {
                if !existing.tombstone {
                    self.live_bytes -= u64::from(existing.location.len);
                }
                if !entry.tombstone {
                    self.live_bytes += u64::from(location.len);
                }
                *existing = entry;
            }
            None => {
                if !entry.tombstone {
                    self.live_bytes += u64::from(location.len);
                }
                self.index.insert(record.key, entry);
            }
        }
    }

    /// Current size accounting. Cheap; reads nothing from the backend.
    #[must_use]
    pub fn measure(&self) -> Measurement {
        Measurement {
            total_bytes: self.total_bytes,
            used_bytes: self.used_bytes(),
        }
    }

    fn used_bytes(&self) -> u64 {
        HEADER_LEN + self.live_bytes
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.values().filter(|e| !e.tombstone).count()
    }

    /// Returns true if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is live.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.get(key).is_some_and(|e| !e.tombstone)
    }

    /// Live keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.index
            .iter()
            .filter(|(_, e)| !e.tombstone)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Bytes of a torn trailing record left in place by a read-only open.
    #[must_use]
    pub fn torn_tail_bytes(&self) -> u64 {
        self.torn_tail_bytes
    }

    /// Returns true for a log from [`RecordLog::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    /// Sequence number the next write will receive.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Reads the current value of `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        match self.index.get(key) {
            Some(entry) if !entry.tombstone => {
                Ok(Some(self.read_record(entry.location)?.value))
            }
            _ => Ok(None),
        }
    }

    /// Writes `value` under `key` and returns the appended record.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<Record> {
        validate_key(key)?;
        let record = Record::put(key.to_vec(), value.to_vec(), self.next_sequence);
        self.append_record(&record)?;
        Ok(record)
    }

    /// Deletes `key`. Returns the tombstone written, or `None` if the key
    /// was not live and nothing was written.
    pub fn delete(&mut self, key: &[u8]) -> CoreResult<Option<Record>> {
        validate_key(key)?;
        if !self.contains(key) {
            return Ok(None);
        }
        let record = Record::tombstone(key.to_vec(), self.next_sequence);
        self.append_record(&record)?;
        Ok(Some(record))
    }

    /// Appends an already-sequenced record, keeping its sequence number.
    ///
    /// Compaction uses this to carry records into a new file unchanged.
    pub fn append_record(&mut self, record: &Record) -> CoreResult<RecordLocation> {
        self.check_writable()?;
        let bytes = record.encode()?;
        let offset = self.backend.append(&bytes)?;
        let location = RecordLocation {
            offset,
            len: bytes.len() as u32,
        };
        self.total_bytes = offset + bytes.len() as u64;
        self.next_sequence = self.next_sequence.max(record.sequence + 1);
        self.index_record(record.clone(), location);
        Ok(location)
    }

    /// Reads and decodes the record at `location`.
    pub fn read_record(&self, location: RecordLocation) -> CoreResult<Record> {
        let bytes = self
            .backend
            .read_at(location.offset, location.len as usize)?;
        Record::decode(&bytes, location.offset)
    }

    /// Locations of every live record, in key order.
    #[must_use]
    pub fn live_locations(&self) -> Vec<RecordLocation> {
        self.index
            .values()
            .filter(|e| !e.tombstone)
            .map(|e| e.location)
            .collect()
    }

    /// Every live record, in key order.
    pub fn live_records(&self) -> CoreResult<Vec<Record>> {
        self.live_locations()
            .into_iter()
            .map(|loc| self.read_record(loc))
            .collect()
    }

    /// Rescans the backend and checks every record checksum.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        let size = self.backend.len()?;
        decode_header(&self.backend.read_at(0, HEADER_LEN as usize)?)?;

        let mut report = VerifyReport::default();
        let mut offset = HEADER_LEN;
        while offset < size {
            let Some(len) = self.record_len_at(offset, size)? else {
                self.check_torn_tail(offset, size)?;
                report.torn_tail_bytes = size - offset;
                break;
            };
            let record = Record::decode(&self.backend.read_at(offset, len as usize)?, offset)?;
            report.records += 1;
            if record.tombstone {
                report.tombstones += 1;
            }
            let newest = self
                .index
                .get(&record.key)
                .is_some_and(|e| e.location.offset == offset);
            if !newest {
                report.superseded += 1;
            }
            offset += u64::from(len);
        }
        report.bytes_scanned = size - HEADER_LEN;
        Ok(report)
    }

    /// Flushes buffered writes to the OS. A no-op when read-only.
    pub fn flush(&mut self) -> CoreResult<()> {
        if !self.read_only {
            self.backend.flush()?;
        }
        Ok(())
    }

    /// Forces all writes to stable storage. A no-op when read-only.
    pub fn sync(&mut self) -> CoreResult<()> {
        if !self.read_only {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// The underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
