//! On-disk layout of a data file.
//!
//! ```text
//! header (16 bytes):
//!   magic "STOW" | version u16 LE | 10 reserved zero bytes
//! record:
//!   len u32 LE | flags u8 | sequence u64 LE | key_len u16 LE | key | value | crc32 u32 LE
//! ```
//!
//! `len` covers the whole record including itself and the CRC. The CRC is
//! IEEE CRC32 over every byte before it.

use crate::error::{CoreError, CoreResult};

/// Magic bytes at the start of every data file.
pub const MAGIC: [u8; 4] = *b"STOW";

/// Format version written by this build.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the file header.
pub const HEADER_LEN: u64 = 16;

/// Longest key a record can carry.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// len + flags + sequence + key_len
const PREFIX_LEN: usize = 4 + 1 + 8 + 2;
const CRC_LEN: usize = 4;

/// Encoded size of a record with an empty key and value.
pub const MIN_RECORD_LEN: usize = PREFIX_LEN + CRC_LEN;

/// Largest record the `u32` length field can describe.
pub const MAX_RECORD_LEN: usize = u32::MAX as usize;

/// Encodes the file header.
#[must_use]
pub fn encode_header() -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];
    header[..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header
}

/// Validates a file header.
pub fn decode_header(bytes: &[u8]) -> CoreResult<()> {
    if bytes.len() < HEADER_LEN as usize {
        return Err(CoreError::corrupted("file shorter than header"));
    }
    if bytes[..4] != MAGIC {
        return Err(CoreError::corrupted("bad magic, not a StowDB data file"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(CoreError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// A single put or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key bytes, 1..=65535 long.
    pub key: Vec<u8>,
    /// Value bytes; empty for a tombstone.
    pub value: Vec<u8>,
    /// Monotonic write sequence within a file.
    pub sequence: u64,
    /// Whether this record deletes `key`.
    pub tombstone: bool,
}

impl Record {
    const FLAG_TOMBSTONE: u8 = 0x01;

    /// Creates a put record.
    #[must_use]
    pub fn put(key: Vec<u8>, value: Vec<u8>, sequence: u64) -> Self {
        Self {
            key,
            value,
            sequence,
            tombstone: false,
        }
    }

    /// Creates a tombstone for `key`.
    #[must_use]
    pub fn tombstone(key: Vec<u8>, sequence: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            sequence,
            tombstone: true,
        }
    }

    /// Size of this record on disk.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.key.len() + self.value.len() + CRC_LEN
    }

    /// Encodes the record.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        validate_key(&self.key)?;
        let len = self.encoded_len();
        let len32 = checked_record_len(len)?;

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&len32.to_le_bytes());
        buf.push(if self.tombstone {
            Self::FLAG_TOMBSTONE
        } else {
            0
        });
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a record occupying exactly `data`, which was read at `offset`.
    pub fn decode(data: &[u8], offset: u64) -> CoreResult<Self> {
        if data.len() < MIN_RECORD_LEN {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} is {} bytes, shorter than the minimum",
                data.len()
            )));
        }
        let len = read_len(data) as usize;
        if len != data.len() {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} declares {len} bytes but {} were read",
                data.len()
            )));
        }

        let body = &data[..len - CRC_LEN];
        let expected = u32::from_le_bytes([
            data[len - 4],
            data[len - 3],
            data[len - 2],
            data[len - 1],
        ]);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let tombstone = data[4] & Self::FLAG_TOMBSTONE != 0;
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[5..13]);
        let sequence = u64::from_le_bytes(seq);
        let key_len = u16::from_le_bytes([data[13], data[14]]) as usize;
        let key_end = PREFIX_LEN + key_len;
        if key_len == 0 || key_end > body.len() {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} has invalid key length {key_len}"
            )));
        }

        Ok(Self {
            key: data[PREFIX_LEN..key_end].to_vec(),
            value: body[key_end..].to_vec(),
            sequence,
            tombstone,
        })
    }
}

fn checked_record_len(len: usize) -> CoreResult<u32> {
    u32::try_from(len).map_err(|_| CoreError::RecordTooLarge {
        size: len,
        max: MAX_RECORD_LEN,
    })
}

/// Checks the fixed fields at the start of `bytes` against what the writer
/// could have produced. `bytes` may end anywhere inside the record; fields
/// that are not fully present are not checked.
#[must_use]
pub fn plausible_prefix(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return true;
    }
    let len = read_len(bytes) as usize;
    if len < MIN_RECORD_LEN {
        return false;
    }
    if bytes.len() < PREFIX_LEN {
        return bytes.len() < 5 || bytes[4] & !Record::FLAG_TOMBSTONE == 0;
    }
    let key_len = u16::from_le_bytes([bytes[13], bytes[14]]) as usize;
    bytes[4] & !Record::FLAG_TOMBSTONE == 0
        && key_len > 0
        && PREFIX_LEN + key_len + CRC_LEN <= len
}

/// Position of the first complete record in `bytes` that passes its
/// checksum, if any.
#[must_use]
pub fn find_record(bytes: &[u8]) -> Option<usize> {
    let last_start = bytes.len().checked_sub(MIN_RECORD_LEN)?;
    (0..=last_start).find(|&start| {
        let rest = &bytes[start..];
        if !plausible_prefix(rest) {
            return false;
        }
        let len = read_len(rest) as usize;
        len <= rest.len() && Record::decode(&rest[..len], 0).is_ok()
    })
}

/// Reads the length prefix of an encoded record.
#[must_use]
pub fn read_len(prefix: &[u8]) -> u32 {
    u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]])
}

/// Rejects keys the format cannot carry.
pub fn validate_key(key: &[u8]) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_key("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CoreError::invalid_key(format!(
            "key is {} bytes, limit is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    Ok(())
}

/// IEEE CRC32.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    crc ^ 0xFFFF_FFFF
}
