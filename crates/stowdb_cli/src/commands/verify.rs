//! Verify command implementation.

use std::path::Path;
use stowdb_core::{StorageFile, VerifyReport};

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying data file at {:?}", path);
    println!();

    match verify(path) {
        Ok(report) => {
            print_report(&report);
            println!();
            println!("✓ Data file verification passed");
            Ok(())
        }
        Err(e) => {
            println!("  Error: {e}");
            println!();
            println!("✗ Data file verification failed");
            Err("Verification failed".into())
        }
    }
}

fn verify(path: &Path) -> Result<VerifyReport, Box<dyn std::error::Error>> {
    let file = StorageFile::open_read_only(path)?;
    Ok(file.verify()?)
}

fn print_report(report: &VerifyReport) {
    println!("Records:");
    println!("  Checked:    {}", report.records);
    println!("  Tombstones: {}", report.tombstones);
    println!("  Superseded: {}", report.superseded);
    println!("  Bytes:      {}", report.bytes_scanned);
    if report.torn_tail_bytes > 0 {
        println!(
            "  Torn tail:  {} bytes (dropped on next writable open)",
            report.torn_tail_bytes
        );
    }
}
