//! Providers create named backends inside a namespace.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::{InMemoryBackend, Registry};
use std::path::{Path, PathBuf};

/// Creates the backing resource for a segment by name.
///
/// The name is chosen by the engine; the provider decides where that name
/// lives (a directory, a memory registry). Creation is exclusive: an existing
/// resource is never reopened.
pub trait StorageProvider: Send + Sync {
    /// Creates a new, empty backend called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the name is taken, or
    /// another error if the name is not usable or the resource cannot be
    /// created.
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;
}

/// Spools every backend into a file under one directory.
#[derive(Debug, Clone)]
pub struct FileProvider {
    dir: PathBuf,
}

impl FileProvider {
    /// Creates a provider rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the spool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path a backend named `name` is stored at.
    pub fn path_of(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }
}

impl StorageProvider for FileProvider {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.path_of(name)?;
        match FileBackend::create_new(&path) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(StorageError::AlreadyExists { .. }) => Err(StorageError::AlreadyExists {
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Keeps every backend in memory and remembers which ones are still alive.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    registry: Registry,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all backends that have not been removed, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns true if a backend with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().contains_key(name)
    }

    /// Returns a copy of the bytes stored under `name`.
    #[must_use]
    pub fn data(&self, name: &str) -> Option<Vec<u8>> {
        self.registry.read().get(name).map(|d| d.read().clone())
    }
}

impl StorageProvider for InMemoryProvider {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_name(name)?;
        Ok(Box::new(InMemoryBackend::registered(
            name.to_string(),
            self.registry.clone(),
        )?))
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.contains(['/', '\\']) {
        "contains a path separator"
    } else if name == "." || name == ".." {
        "refers to a directory"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
