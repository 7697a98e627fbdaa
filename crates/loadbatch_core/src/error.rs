//! Error types for the batching engine.

use crate::key::PartitionKey;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for segment operations.
pub type SegmentResult<T> = Result<T, SegmentError>;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised by a single segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Backing storage error.
    #[error("storage error: {0}")]
    Storage(#[from] loadbatch_storage::StorageError),

    /// Compression stream error.
    #[error("compression error: {0}")]
    Io(#[from] io::Error),

    /// The payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The segment no longer accepts this operation.
    #[error("segment {name} is {state}")]
    Closed {
        /// Segment name.
        name: String,
        /// The state that rejected the operation.
        state: &'static str,
    },
}

/// Error returned by a bulk-load backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Error message reported by the backend.
    pub message: String,
    /// Whether the backend considers the load worth retrying.
    pub retryable: bool,
}

impl BackendError {
    /// Creates a retryable backend error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable backend error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Why a record or a segment ended up on the failure channel.
///
/// The variants separate delivery problems from local problems: a
/// [`FailureCause::Release`] means the backend accepted the data and only
/// local cleanup failed.
#[derive(Debug, Error)]
pub enum FailureCause {
    /// The record could not be written into a segment.
    #[error("ingest failed for {key}: {source}")]
    Ingest {
        /// Partition of the rejected record.
        key: PartitionKey,
        /// Underlying segment error.
        #[source]
        source: SegmentError,
    },

    /// The segment could not be prepared for submission.
    #[error("prepare failed: {0}")]
    Prepare(#[source] SegmentError),

    /// The backend rejected or failed the load.
    #[error("submit failed: {0}")]
    Submit(#[source] BackendError),

    /// The load succeeded but the segment could not be finalized or removed.
    #[error("release failed after successful load: {0}")]
    Release(#[source] SegmentError),
}

impl FailureCause {
    /// Returns the backend error if the failure happened during submission.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            FailureCause::Submit(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the data reached the backend despite the failure.
    pub fn is_delivered(&self) -> bool {
        matches!(self, FailureCause::Release(_))
    }
}

/// Errors returned by the [`crate::Loader`] handle.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The loader is closed and no longer accepts records.
    #[error("loader is closed")]
    Closed,

    /// A background thread could not be started.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// Spawn error.
        #[source]
        source: io::Error,
    },
}

/// Error returned by [`crate::Loader::try_submit`], handing the record back.
pub enum TrySubmitError<R> {
    /// The input queue is full.
    Full(R),
    /// The loader is closed.
    Closed(R),
}

impl<R> TrySubmitError<R> {
    /// Returns the rejected record.
    pub fn into_inner(self) -> R {
        match self {
            TrySubmitError::Full(r) | TrySubmitError::Closed(r) => r,
        }
    }
}

impl<R> fmt::Debug for TrySubmitError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySubmitError::Full(_) => f.write_str("Full(..)"),
            TrySubmitError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<R> fmt::Display for TrySubmitError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySubmitError::Full(_) => f.write_str("input queue is full"),
            TrySubmitError::Closed(_) => f.write_str("loader is closed"),
        }
    }
}

impl<R> std::error::Error for TrySubmitError<R> {}
