//! Loader configuration.

use crate::backend::{LoadOptions, TableSchema};
use crate::error::{LoaderError, LoaderResult};
use std::path::PathBuf;
use std::time::Duration;

/// What happens to a segment's backing resource when its load fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedSegmentPolicy {
    /// Finalize the segment and leave it in the spool for manual recovery.
    #[default]
    Retain,
    /// Delete the segment.
    Discard,
}

/// Configuration for a [`crate::Loader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// How long records accumulate before their generation is sealed.
    pub window: Duration,

    /// Spool directory for segment files.
    pub dir: PathBuf,

    /// Maximum concurrent backend submissions.
    pub max_jobs: usize,

    /// Number of ingestion workers.
    pub workers: usize,

    /// Capacity of the input queue and of each outcome channel.
    pub buffer_size: usize,

    /// Schema hint passed to the backend.
    pub schema: Option<TableSchema>,

    /// Ask the backend to detect the schema from the data.
    pub auto_detect_schema: bool,

    /// zstd compression level for segments.
    pub compression_level: i32,

    /// Disposition of segments whose load failed.
    pub failed_segments: FailedSegmentPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            dir: PathBuf::from("loadbatch-spool"),
            max_jobs: 4,
            workers: 4,
            buffer_size: 1024,
            schema: None,
            auto_detect_schema: false,
            compression_level: 3,
            failed_segments: FailedSegmentPolicy::Retain,
        }
    }
}

impl LoaderConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the window duration.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the spool directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Sets the maximum number of concurrent submissions.
    #[must_use]
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    /// Sets the number of ingestion workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the queue and channel capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the schema hint.
    #[must_use]
    pub fn with_schema(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Enables or disables schema auto-detection.
    #[must_use]
    pub fn with_auto_detect_schema(mut self, value: bool) -> Self {
        self.auto_detect_schema = value;
        self
    }

    /// Sets the zstd compression level.
    #[must_use]
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the failed segment policy.
    #[must_use]
    pub fn with_failed_segments(mut self, policy: FailedSegmentPolicy) -> Self {
        self.failed_segments = policy;
        self
    }

    /// Load options derived from this configuration.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            schema: self.schema.clone(),
            auto_detect_schema: self.auto_detect_schema,
            ..LoadOptions::default()
        }
    }

    /// Checks that the configuration can run.
    pub fn validate(&self) -> LoaderResult<()> {
        let problem = if self.window.is_zero() {
            "window must be greater than zero"
        } else if self.max_jobs == 0 {
            "max_jobs must be at least 1"
        } else if self.workers == 0 {
            "workers must be at least 1"
        } else if self.buffer_size == 0 {
            "buffer_size must be at least 1"
        } else {
            return Ok(());
        };
        Err(LoaderError::InvalidConfig(problem.to_string()))
    }
}
