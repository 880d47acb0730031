//! End-to-end tests for compaction on open.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use stowdb_storage::StorageError;
use stowdb_core::{
    compact_path, open_with_compaction, CompactionMode, CompactionOutcome, CompactorEngine,
    CoreError, OpenOptions, SizeRatioPolicy, StorageFile,
};
use tempfile::tempdir;

/// Writes `rounds` versions of `keys` keys, leaving most of the file as slack.
fn seed(path: &Path, keys: u16, rounds: u8) {
    let mut file = StorageFile::open(path).unwrap();
    for round in 0..rounds {
        for key in 0..keys {
            file.put(format!("item:{key:04}").as_bytes(), &[round; 256])
                .unwrap();
        }
    }
    file.sync().unwrap();
}

fn always(_: u64, _: u64) -> bool {
    true
}

#[test]
fn sync_compaction_shrinks_and_keeps_latest_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 64, 5);
    let before = fs::metadata(&path).unwrap().len();

    let store = open_with_compaction(&path, &SizeRatioPolicy::new(0, 0.5), CompactionMode::Sync)
        .unwrap();

    let CompactionOutcome::Compacted(report) = store.compaction_outcome() else {
        panic!("expected compaction");
    };
    assert_eq!(report.bytes_before, before);
    assert!(report.bytes_after < before / 4);
    assert_eq!(report.records_written, 64);
    assert_eq!(store.len(), 64);
    assert_eq!(store.get(b"item:0010").unwrap().unwrap(), vec![4u8; 256]);
}

#[test]
fn compacted_file_reopens_with_same_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 16, 3);
    {
        let store = open_with_compaction(&path, &always, CompactionMode::Sync).unwrap();
        assert!(store.delete(b"item:0003").unwrap());
        store.sync().unwrap();
    }

    let store = open_with_compaction(&path, &|_: u64, _: u64| false, CompactionMode::Sync)
        .unwrap();
    assert_eq!(store.len(), 15);
    assert!(!store.contains(b"item:0003"));
    assert_eq!(store.get(b"item:0015").unwrap().unwrap(), vec![2u8; 256]);
    let verified = store.verify().unwrap();
    assert_eq!(verified.tombstones, 1);
}

#[test]
fn fresh_file_has_no_slack() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fresh.stow");

    let store = open_with_compaction(
        &path,
        &|total: u64, used: u64| {
            assert_eq!(total, used);
            false
        },
        CompactionMode::Sync,
    )
    .unwrap();
    assert!(store.is_empty());
    assert_eq!(store.measure().reclaimable_bytes(), 0);
}

#[test]
fn missing_file_without_create_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.stow");

    let engine = CompactorEngine::new(OpenOptions::new().create_if_missing(false));
    let err = engine.open(&path, &always).unwrap_err();
    assert!(matches!(err, CoreError::Storage(StorageError::NotFound(_))));
    assert!(!path.exists());
}

#[test]
fn async_compaction_keeps_concurrent_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 128, 6);

    let engine = CompactorEngine::new(OpenOptions::new().mode(CompactionMode::Async));
    let store = Arc::new(engine.open(&path, &always).unwrap());

    let writers: Vec<_> = (0..4u8)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50u16 {
                    let key = format!("live:{t}:{i}");
                    store.put(key.as_bytes(), &[t; 16]).unwrap();
                }
                store.delete(b"item:0000").unwrap();
                store
                    .put(format!("item:{:04}", 100 + u16::from(t)).as_bytes(), b"updated")
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let outcome = store.wait_for_compaction().unwrap();
    assert!(outcome.is_compacted(), "{outcome:?}");
    assert!(!store.is_compacting());

    assert_eq!(store.len(), 127 + 200);
    assert!(!store.contains(b"item:0000"));
    assert_eq!(store.get(b"item:0101").unwrap().unwrap(), b"updated");
    assert_eq!(store.get(b"live:3:49").unwrap().unwrap(), vec![3u8; 16]);

    let m = store.measure();
    assert!(m.used_bytes <= m.total_bytes);
    store.verify().unwrap();
    drop(store);

    let reopened = StorageFile::open(&path).unwrap();
    assert_eq!(reopened.len(), 327);
    assert_eq!(reopened.get(b"live:0:0").unwrap().unwrap(), vec![0u8; 16]);
    assert!(!compact_path(&path).exists());
}

#[test]
fn async_failure_falls_back_to_original_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 8, 4);
    fs::create_dir(compact_path(&path)).unwrap();

    let engine = CompactorEngine::new(OpenOptions::new().mode(CompactionMode::Async));
    let store = engine.open(&path, &always).unwrap();
    store.put(b"after", b"open").unwrap();

    let outcome = store.wait_for_compaction().unwrap();
    assert!(matches!(outcome, CompactionOutcome::FellBack { .. }));
    assert_eq!(store.get(b"after").unwrap().unwrap(), b"open");
    assert_eq!(store.len(), 9);
}

#[test]
fn async_failure_in_strict_mode_surfaces_on_wait() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 8, 4);
    fs::create_dir(compact_path(&path)).unwrap();

    let engine = CompactorEngine::new(
        OpenOptions::new()
            .mode(CompactionMode::Async)
            .strict(true),
    );
    let store = engine.open(&path, &always).unwrap();

    let first = store.wait_for_compaction().unwrap_err();
    assert!(first.is_io());
    let second = store.wait_for_compaction().unwrap_err();
    assert!(matches!(second, CoreError::CompactionFailed { .. }));
    assert_eq!(store.len(), 8);
}

#[test]
fn second_handle_is_locked_out() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 4, 1);

    let _store = open_with_compaction(&path, &always, CompactionMode::Sync).unwrap();
    let err = open_with_compaction(&path, &always, CompactionMode::Sync).unwrap_err();
    assert!(matches!(err, CoreError::Locked { .. }));
}

#[test]
fn default_policy_leaves_small_files_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("todo.stow");
    seed(&path, 32, 8);
    let before = fs::read(&path).unwrap();

    let store = open_with_compaction(
        &path,
        &SizeRatioPolicy::over_100_mib_half_empty(),
        CompactionMode::Sync,
    )
    .unwrap();
    assert!(matches!(
        store.compaction_outcome(),
        CompactionOutcome::Skipped(_)
    ));
    drop(store);
    assert_eq!(fs::read(&path).unwrap(), before);
}
