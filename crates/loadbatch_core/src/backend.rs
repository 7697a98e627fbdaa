//! Bulk-load backend boundary.
//!
//! The engine hands each sealed, finished segment to a [`LoadBackend`]. How
//! the backend authenticates, creates load jobs or negotiates schemas is its
//! own business; the engine only prescribes the payload format (zstd
//! compressed, newline-delimited JSON) and the destination.

use crate::error::BackendError;
use crate::key::PartitionKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A bulk-load backend.
///
/// Called concurrently from dispatch tasks, at most `max_jobs` at a time.
/// There is no timeout: a call that never returns holds its dispatch slot.
pub trait LoadBackend: Send + Sync + 'static {
    /// Loads one segment into its destination.
    fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, BackendError>;
}

/// Format of the records inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// One JSON document per line.
    NewlineDelimitedJson,
}

/// Compression applied to segment contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// A zstd stream.
    Zstd,
}

/// One column of a destination table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Column name.
    pub name: String,
    /// Column type, in the backend's vocabulary.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Column mode (e.g. `NULLABLE`, `REQUIRED`, `REPEATED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Schema hint passed through to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns.
    pub fields: Vec<SchemaField>,
}

/// Load job settings shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Schema to load with, if any.
    pub schema: Option<TableSchema>,
    /// Ask the backend to infer the schema from the data.
    pub auto_detect_schema: bool,
    /// Create the destination if it does not exist.
    pub create_if_needed: bool,
    /// Append to the destination rather than replacing it.
    pub write_append: bool,
    /// Record format.
    pub source_format: SourceFormat,
    /// Payload compression.
    pub compression: Compression,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            schema: None,
            auto_detect_schema: false,
            create_if_needed: true,
            write_append: true,
            source_format: SourceFormat::NewlineDelimitedJson,
            compression: Compression::Zstd,
        }
    }
}

/// One segment submitted for loading.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Segment name.
    pub segment: String,
    /// Destination derived from the partition key.
    pub destination: PartitionKey,
    /// Compressed size in bytes.
    pub size: u64,
    /// Number of records in the segment.
    pub records: u64,
    /// Compressed segment contents.
    pub content: Vec<u8>,
    /// Job settings.
    pub options: LoadOptions,
}

/// What a backend reports for an accepted load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReceipt {
    /// Backend job identifier, if the backend has one.
    pub job_id: Option<String>,
}

/// A scriptable backend for tests and demos.
///
/// Records every request it receives and tracks how many calls overlap.
#[derive(Debug, Default)]
pub struct MockBackend {
    failure: Option<BackendError>,
    latency: Duration,
    requests: Mutex<Vec<LoadRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    jobs: AtomicUsize,
}

impl MockBackend {
    /// A backend that accepts every load.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that fails every load with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(BackendError::fatal(message)),
            ..Self::default()
        }
    }

    /// Makes every call take at least `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Highest number of overlapping calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

impl LoadBackend for MockBackend {
    fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.requests.lock().push(request.clone());
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let job = self.jobs.fetch_add(1, Ordering::AcqRel);
        Ok(LoadReceipt {
            job_id: Some(format!("mock-job-{job}")),
        })
    }
}
