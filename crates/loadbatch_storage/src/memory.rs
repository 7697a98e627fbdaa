//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type Registry = Arc<RwLock<HashMap<String, Arc<RwLock<Vec<u8>>>>>>;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Spools that don't need to survive the process
///
/// A backend created through [`crate::InMemoryProvider`] is registered under
/// its name until it is removed, so the provider can report which resources
/// are still alive.
///
/// # Example
///
/// ```rust
/// use loadbatch_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    registration: Option<(String, Registry)>,
    removed: bool,
}

impl InMemoryBackend {
    /// Creates a new empty, unregistered in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn registered(name: String, registry: Registry) -> StorageResult<Self> {
        let data = Arc::new(RwLock::new(Vec::new()));
        match registry.write().entry(name.clone()) {
            Entry::Occupied(_) => return Err(StorageError::AlreadyExists { name }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&data));
            }
        }
        Ok(Self {
            data,
            registration: Some((name, registry)),
            removed: false,
        })
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.removed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.check_open()?;
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_open()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        // Nothing is buffered outside the vector
        self.check_open()
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_open()?;
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_open()
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.check_open()?;
        self.removed = true;
        self.data.write().clear();
        if let Some((name, registry)) = &self.registration {
            registry.write().remove(name);
        }
        Ok(())
    }
}
