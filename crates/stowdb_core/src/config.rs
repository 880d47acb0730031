//! Open-time configuration.

/// How an open-time compaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionMode {
    /// Compact before `open` returns.
    #[default]
    Sync,
    /// Return immediately and compact on a background thread. Writes made
    /// meanwhile are carried into the compacted file.
    Async,
}

/// Options for [`crate::CompactorEngine`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Whether compaction blocks the open.
    pub mode: CompactionMode,

    /// Fail instead of falling back to the uncompacted file when compaction
    /// fails.
    pub strict: bool,

    /// Create the data file if it does not exist.
    pub create_if_missing: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mode: CompactionMode::Sync,
            strict: false,
            create_if_missing: true,
        }
    }
}

impl OpenOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compaction mode.
    #[must_use]
    pub const fn mode(mut self, mode: CompactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets strict mode.
    #[must_use]
    pub const fn strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }

    /// Sets whether a missing file is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = OpenOptions::default();
        assert_eq!(options.mode, CompactionMode::Sync);
        assert!(!options.strict);
        assert!(options.create_if_missing);
    }

    #[test]
    fn builder() {
        let options = OpenOptions::new()
            .mode(CompactionMode::Async)
            .strict(true)
            .create_if_missing(false);
        assert_eq!(options.mode, CompactionMode::Async);
        assert!(options.strict);
        assert!(!options.create_if_missing);
    }
}
