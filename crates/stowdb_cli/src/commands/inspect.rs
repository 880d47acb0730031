//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use stowdb_core::{CompactionPolicy, SizeRatioPolicy, StorageFile};

/// Data file inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data file path.
    pub path: String,
    /// File length in bytes.
    pub total_bytes: u64,
    /// Bytes holding live data.
    pub used_bytes: u64,
    /// Bytes a compaction would reclaim.
    pub reclaimable_bytes: u64,
    /// `used_bytes / total_bytes`.
    pub live_ratio: f64,
    /// Number of live keys.
    pub key_count: usize,
    /// Bytes of a torn trailing record left by a crash.
    pub torn_tail_bytes: u64,
    /// Policy thresholds applied.
    pub policy: PolicySummary,
    /// Whether the policy would compact on open.
    pub would_compact: bool,
}

/// Policy thresholds in the output.
#[derive(Debug, Serialize)]
pub struct PolicySummary {
    /// Minimum file size, bytes.
    pub min_total_bytes: u64,
    /// Maximum live ratio.
    pub max_used_ratio: f64,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    policy: &SizeRatioPolicy,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, policy)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path, policy: &SizeRatioPolicy) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data file found at {:?}", path).into());
    }

    let file = StorageFile::open_read_only(path)?;
    let m = file.measure();

    Ok(InspectResult {
        path: path.display().to_string(),
        total_bytes: m.total_bytes,
        used_bytes: m.used_bytes,
        reclaimable_bytes: m.reclaimable_bytes(),
        live_ratio: m.live_ratio(),
        key_count: file.len(),
        torn_tail_bytes: file.torn_tail_bytes(),
        policy: PolicySummary {
            min_total_bytes: policy.min_total_bytes(),
            max_used_ratio: policy.max_used_ratio(),
        },
        would_compact: m.total_bytes > 0 && policy.should_compact(m.total_bytes, m.used_bytes),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("StowDB Data File: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Total size:   {}", format_bytes(result.total_bytes));
    println!("  Live data:    {}", format_bytes(result.used_bytes));
    println!("  Reclaimable:  {}", format_bytes(result.reclaimable_bytes));
    println!("  Live ratio:   {:.1}%", result.live_ratio * 100.0);
    if result.torn_tail_bytes > 0 {
        println!("  Torn tail:    {}", format_bytes(result.torn_tail_bytes));
    }
    println!();
    println!("Keys: {}", result.key_count);
    println!();
    println!(
        "Policy (> {}, ratio < {:.2}): {}",
        format_bytes(result.policy.min_total_bytes),
        result.policy.max_used_ratio,
        if result.would_compact {
            "would compact"
        } else {
            "would skip"
        }
    );
}

/// Formats bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(150 * 1024 * 1024), "150.00 MiB");
    }

    #[test]
    fn inspect_reports_slack() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        {
            let mut file = StorageFile::open(&path).unwrap();
            for _ in 0..4 {
                file.put(b"k", &[7u8; 100]).unwrap();
            }
            file.sync().unwrap();
        }

        let result = inspect(&path, &SizeRatioPolicy::new(0, 0.5)).unwrap();
        assert_eq!(result.key_count, 1);
        assert!(result.reclaimable_bytes > 0);
        assert!(result.would_compact);

        let result = inspect(&path, &SizeRatioPolicy::over_100_mib_half_empty()).unwrap();
        assert!(!result.would_compact);
    }

    #[test]
    fn inspect_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.stow");
        {
            let mut file = StorageFile::open(&path).unwrap();
            file.put(b"k", b"v").unwrap();
            file.sync().unwrap();
        }
        fs::remove_file(stowdb_core::lock_path(&path)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0x30, 0, 0]);
        fs::write(&path, &bytes).unwrap();

        let result = inspect(&path, &SizeRatioPolicy::new(0, 0.5)).unwrap();
        assert_eq!(result.key_count, 1);
        assert_eq!(result.torn_tail_bytes, 3);
        assert_eq!(result.total_bytes, bytes.len() as u64);
        assert_eq!(fs::read(&path).unwrap(), bytes);
        assert!(!stowdb_core::lock_path(&path).exists());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.stow"), &SizeRatioPolicy::new(0, 0.5)).is_err());
    }
}
