//! Compaction trigger policies.
//!
//! A policy sees the file's `(total_bytes, used_bytes)` once, at open time,
//! and answers whether to compact. Policies are pure: no I/O, no interior
//! state, safe to call from any thread.
//!
//! Nothing compacts unless the caller passes a policy. Closures work
//! directly:
//!
//! ```rust
//! use stowdb_core::CompactionPolicy;
//!
//! let over_one_gib = |total: u64, _used: u64| total > 1 << 30;
//! assert!(!over_one_gib.should_compact(1024, 512));
//! ```

/// Decides whether a data file should be compacted when it is opened.
pub trait CompactionPolicy: Send + Sync {
    /// Returns true to compact a file of `total_bytes` of which
    /// `used_bytes` are live.
    fn should_compact(&self, total_bytes: u64, used_bytes: u64) -> bool;
}

impl<F> CompactionPolicy for F
where
    F: Fn(u64, u64) -> bool + Send + Sync,
{
    fn should_compact(&self, total_bytes: u64, used_bytes: u64) -> bool {
        self(total_bytes, used_bytes)
    }
}

/// Compact when the file is larger than a size floor and its live ratio
/// has dropped below a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeRatioPolicy {
    min_total_bytes: u64,
    max_used_ratio: f64,
}

impl SizeRatioPolicy {
    /// 100 MiB.
    pub const ONE_HUNDRED_MIB: u64 = 100 * 1024 * 1024;

    /// Compacts when `total_bytes > min_total_bytes` and
    /// `used_bytes / total_bytes < max_used_ratio`.
    #[must_use]
    pub const fn new(min_total_bytes: u64, max_used_ratio: f64) -> Self {
        Self {
            min_total_bytes,
            max_used_ratio,
        }
    }

    /// Files over 100 MiB that are less than half live.
    #[must_use]
    pub const fn over_100_mib_half_empty() -> Self {
        Self::new(Self::ONE_HUNDRED_MIB, 0.5)
    }

    /// The size floor.
    #[must_use]
    pub const fn min_total_bytes(&self) -> u64 {
        self.min_total_bytes
    }

    /// The live-ratio threshold.
    #[must_use]
    pub const fn max_used_ratio(&self) -> f64 {
        self.max_used_ratio
    }
}

impl CompactionPolicy for SizeRatioPolicy {
    fn should_compact(&self, total_bytes: u64, used_bytes: u64) -> bool {
        if total_bytes == 0 {
            return false;
        }
        total_bytes > self.min_total_bytes
            && (used_bytes as f64 / total_bytes as f64) < self.max_used_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn documented_scenarios() {
        let policy = SizeRatioPolicy::over_100_mib_half_empty();
        assert!(policy.should_compact(150 * MIB, 40 * MIB));
        assert!(!policy.should_compact(150 * MIB, 80 * MIB));
        assert!(!policy.should_compact(50 * MIB, MIB));
    }

    #[test]
    fn boundaries_are_exclusive() {
        let policy = SizeRatioPolicy::over_100_mib_half_empty();
        // exactly 100 MiB is not "over"
        assert!(!policy.should_compact(100 * MIB, 0));
        assert!(policy.should_compact(100 * MIB + 1, 0));
        // exactly half live is not "less than half"
        assert!(!policy.should_compact(200 * MIB, 100 * MIB));
    }

    #[test]
    fn empty_and_full_files_never_compact() {
        let policy = SizeRatioPolicy::new(0, 0.5);
        assert!(!policy.should_compact(0, 0));
        assert!(!policy.should_compact(u64::MAX, u64::MAX));
    }

    #[test]
    fn closures_are_policies() {
        fn evaluate(policy: &dyn CompactionPolicy) -> bool {
            policy.should_compact(10, 1)
        }
        assert!(evaluate(&|total: u64, used: u64| used * 2 < total));
        assert!(!evaluate(&|_: u64, _: u64| false));
    }

    proptest! {
        #[test]
        fn matches_size_and_ratio_rule(total in 0u64..(1u64 << 40), used_frac in 0.0f64..=1.0) {
            let used = ((total as f64) * used_frac) as u64;
            let used = used.min(total);
            let policy = SizeRatioPolicy::over_100_mib_half_empty();
            let expected = total > 100 * MIB && (used as f64) / (total as f64) < 0.5;
            prop_assert_eq!(policy.should_compact(total, used), expected);
        }
    }
}
