//! Benchmark utilities.

use std::path::Path;
use stowdb_core::{CoreResult, StorageFile};

/// Deterministic payload of the given size.
pub fn payload(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_add(seed)).collect()
}

/// Key for index `i`.
pub fn key(i: usize) -> Vec<u8> {
    format!("key:{i:08}").into_bytes()
}

/// Writes `rounds` versions of `keys` keys to a new file at `path`, so that
/// only `1 / rounds` of the file is live.
pub fn write_fragmented(path: &Path, keys: usize, rounds: u8, value_size: usize) -> CoreResult<()> {
    let mut file = StorageFile::open(path)?;
    for round in 0..rounds {
        let value = payload(value_size, round);
        for i in 0..keys {
            file.put(&key(i), &value)?;
        }
    }
    file.sync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmented_file_has_expected_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.stow");
        write_fragmented(&path, 10, 4, 100).unwrap();

        let file = StorageFile::open(&path).unwrap();
        assert_eq!(file.len(), 10);
        assert!(file.measure().live_ratio() < 0.3);
    }
}
