//! # loadbatch storage
//!
//! Backing-resource abstraction for loadbatch segments.
//!
//! A segment accumulates compressed records somewhere until its window is
//! shipped to the bulk-load backend. That "somewhere" is a
//! [`StorageBackend`]: an **opaque append-only byte store** that knows
//! nothing about compression, records, or generations.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (append, read, flush, remove)
//! - Backends are created by name through a [`StorageProvider`], which
//!   owns the namespace (a directory, or an in-memory registry)
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all interpretation of the bytes
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] / [`InMemoryProvider`] - For testing and ephemeral spools
//! - [`FileBackend`] / [`FileProvider`] - Spool files in a directory
//!
//! ## Example
//!
//! ```rust
//! use loadbatch_storage::{InMemoryProvider, StorageProvider};
//!
//! let provider = InMemoryProvider::new();
//! let mut backend = provider.create("1700000000-0-ds-events").unwrap();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"hello world");
//!
//! backend.remove().unwrap();
//! assert!(!provider.contains("1700000000-0-ds-events"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod provider;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use provider::{FileProvider, InMemoryProvider, StorageProvider};
