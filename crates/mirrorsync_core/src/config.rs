//! Local mirror configuration.

/// Configuration for opening a [`Context`](crate::Context).
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to flush the journal to durable storage on every commit.
    pub sync_on_commit: bool,

    /// Journal size in bytes above which the journal is compacted at open.
    /// Zero disables automatic compaction.
    pub compact_threshold: u64,

    /// Number of change events kept for polling.
    pub max_feed_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            compact_threshold: 4 * 1024 * 1024, // 4 MB
            max_feed_history: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to flush the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn max_feed_history(mut self, events: usize) -> Self {
        self.max_feed_history = events;
        self
    }
}
