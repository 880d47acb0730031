//! Compact command implementation.

use super::inspect::format_bytes;
use std::path::Path;
use stowdb_core::{
    CompactionMode, CompactionOutcome, CompactionPolicy, CompactorEngine, Measurement,
    OpenOptions, SizeRatioPolicy, StorageFile,
};

/// Flags for the compact command.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactOptions {
    /// Compact regardless of the policy.
    pub force: bool,
    /// Report only.
    pub dry_run: bool,
    /// Fail instead of falling back.
    pub strict: bool,
    /// Run the rewrite on a background thread.
    pub background: bool,
}

/// Runs the compact command.
pub fn run(
    path: &Path,
    policy: &SizeRatioPolicy,
    options: CompactOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("Data file not found".into());
    }

    println!("Compacting data file at {:?}", path);
    if options.dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    if options.dry_run {
        let (m, would) = dry_run(path, policy, options)?;
        println!("Compaction Analysis:");
        println!("  Size before: {}", format_bytes(m.total_bytes));
        println!("  Size after:  {}", format_bytes(m.used_bytes));
        println!("  Reclaimable: {}", format_bytes(m.reclaimable_bytes()));
        println!();
        if would {
            println!("Compaction would run");
        } else {
            println!("No compaction needed - policy thresholds not met");
        }
        return Ok(());
    }

    let outcome = compact(path, policy, options)?;
    print_outcome(&outcome);
    match outcome {
        CompactionOutcome::FellBack { .. } => Err("Compaction failed".into()),
        _ => Ok(()),
    }
}

fn dry_run(
    path: &Path,
    policy: &SizeRatioPolicy,
    options: CompactOptions,
) -> Result<(Measurement, bool), Box<dyn std::error::Error>> {
    let file = StorageFile::open_read_only(path)?;
    let m = file.measure();
    let would = options.force
        || (m.total_bytes > 0 && policy.should_compact(m.total_bytes, m.used_bytes));
    Ok((m, would))
}

fn compact(
    path: &Path,
    policy: &SizeRatioPolicy,
    options: CompactOptions,
) -> Result<CompactionOutcome, Box<dyn std::error::Error>> {
    let mode = if options.background {
        CompactionMode::Async
    } else {
        CompactionMode::Sync
    };
    let engine = CompactorEngine::new(
        OpenOptions::new()
            .mode(mode)
            .strict(options.strict)
            .create_if_missing(false),
    );

    let forced = |_: u64, _: u64| true;
    let policy: &dyn CompactionPolicy = if options.force { &forced } else { policy };
    let store = engine.open(path, policy)?;
    let outcome = store.wait_for_compaction()?;
    store.sync()?;
    Ok(outcome)
}

fn print_outcome(outcome: &CompactionOutcome) {
    match outcome {
        CompactionOutcome::Skipped(m) => {
            println!(
                "No compaction needed - {} of {} live",
                format_bytes(m.used_bytes),
                format_bytes(m.total_bytes)
            );
        }
        CompactionOutcome::Running => {
            println!("Compaction still running");
        }
        CompactionOutcome::Compacted(report) => {
            println!("Compaction Report:");
            println!("  Records written: {}", report.records_written);
            if report.replayed_writes > 0 {
                println!("  Writes replayed: {}", report.replayed_writes);
            }
            println!("  Size before: {}", format_bytes(report.bytes_before));
            println!("  Size after:  {}", format_bytes(report.bytes_after));
            println!(
                "  Space saved: {} ({:.1}%)",
                format_bytes(report.bytes_saved()),
                if report.bytes_before > 0 {
                    (report.bytes_saved() as f64 / report.bytes_before as f64) * 100.0
                } else {
                    0.0
                }
            );
            println!("  Duration: {:?}", report.duration);
            println!();
            println!("✓ Compaction complete");
        }
        CompactionOutcome::FellBack { error } => {
            println!("✗ Compaction failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn seed(path: &Path) {
        let mut file = StorageFile::open(path).unwrap();
        for round in 0..5u8 {
            for key in 0..10u8 {
                file.put(&[b'k', key], &[round; 64]).unwrap();
            }
        }
        file.sync().unwrap();
    }

    #[test]
    fn forced_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        seed(&path);

        let options = CompactOptions {
            force: true,
            ..CompactOptions::default()
        };
        let outcome = compact(&path, &SizeRatioPolicy::over_100_mib_half_empty(), options).unwrap();
        let CompactionOutcome::Compacted(report) = outcome else {
            panic!("expected compaction");
        };
        assert_eq!(report.records_written, 10);
        assert!(report.bytes_saved() > 0);
    }

    #[test]
    fn policy_skip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        seed(&path);

        let outcome = compact(
            &path,
            &SizeRatioPolicy::over_100_mib_half_empty(),
            CompactOptions::default(),
        )
        .unwrap();
        assert!(matches!(outcome, CompactionOutcome::Skipped(_)));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        seed(&path);
        fs::remove_file(stowdb_core::lock_path(&path)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x30, 0, 0, 0]);
        fs::write(&path, &bytes).unwrap();

        let options = CompactOptions {
            dry_run: true,
            force: true,
            ..CompactOptions::default()
        };
        let (m, would) = dry_run(&path, &SizeRatioPolicy::over_100_mib_half_empty(), options).unwrap();
        assert!(would);
        assert_eq!(m.total_bytes, bytes.len() as u64);
        run(&path, &SizeRatioPolicy::over_100_mib_half_empty(), options).unwrap();

        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert!(!stowdb_core::lock_path(&path).exists());
    }

    #[test]
    fn background_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        seed(&path);

        let options = CompactOptions {
            background: true,
            ..CompactOptions::default()
        };
        let outcome = compact(&path, &SizeRatioPolicy::new(0, 0.5), options).unwrap();
        assert!(outcome.is_compacted());
    }
}
