//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// The storage was removed.
    #[error("storage is closed")]
    Closed,

    /// A resource with this name already exists.
    #[error("resource {name:?} already exists")]
    AlreadyExists {
        /// The name that is taken.
        name: String,
    },

    /// A resource name that cannot be used inside the provider's namespace.
    #[error("invalid resource name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl From<StorageError> for io::Error {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Io(e) => e,
            StorageError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, value.to_string()),
            StorageError::AlreadyExists { .. } => {
                io::Error::new(io::ErrorKind::AlreadyExists, value.to_string())
            }
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
