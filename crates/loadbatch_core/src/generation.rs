//! The double-buffered generation store.
//!
//! Segments of the active generation accept writes; `seal` moves them into
//! the sealed side under their generation number, where the dispatcher
//! picks them up. One reader/writer lock guards both sides:
//!
//! - writers hold the shared lock for the whole append (see
//!   [`SegmentWriter`]), so `seal` cannot complete while a write into the
//!   generation being sealed is still in progress;
//! - `seal` and segment creation take the exclusive lock.

use crate::error::SegmentResult;
use crate::key::{Generation, PartitionKey, SegmentId};
use crate::segment::Segment;
use crate::window::window_start_secs;
use loadbatch_storage::StorageProvider;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

type SegmentMap = HashMap<PartitionKey, Arc<Segment>>;

#[derive(Default)]
struct Generations {
    current: Generation,
    active: SegmentMap,
    sealed: BTreeMap<Generation, SegmentMap>,
}

/// Registry of segments by generation and partition key.
pub struct GenerationStore {
    provider: Arc<dyn StorageProvider>,
    window: Duration,
    compression_level: i32,
    inner: RwLock<Generations>,
}

/// Write access to a segment of the active generation.
///
/// Holding a writer pins the generation: a concurrent [`GenerationStore::seal`]
/// blocks until every writer is dropped. Keep it only for the duration of an
/// append.
pub struct SegmentWriter<'a> {
    _guard: RwLockReadGuard<'a, Generations>,
    segment: Arc<Segment>,
}

impl Deref for SegmentWriter<'_> {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.segment
    }
}

impl GenerationStore {
    /// Creates an empty store whose segments live in `provider`.
    ///
    /// `window` is only used to name segments after their window boundary.
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        window: Duration,
        compression_level: i32,
    ) -> Self {
        Self {
            provider,
            window,
            compression_level,
            inner: RwLock::new(Generations::default()),
        }
    }

    /// Returns the writer for `key` in the active generation, creating the
    /// segment on first use.
    ///
    /// Idempotent per key within a generation: concurrent callers for the
    /// same key always receive the same segment.
    pub fn allocate_or_get_writer(&self, key: &PartitionKey) -> SegmentResult<SegmentWriter<'_>> {
        let guard = self.inner.read();
        let existing = guard.active.get(key).cloned();
        if let Some(segment) = existing {
            return Ok(SegmentWriter {
                _guard: guard,
                segment,
            });
        }
        drop(guard);

        let mut guard = self.inner.write();
        let segment = match guard.active.get(key) {
            Some(segment) => Arc::clone(segment),
            None => {
                let window_start = window_start_secs(SystemTime::now(), self.window);
                let id = SegmentId::new(guard.current, window_start, key.clone());
                let segment = Arc::new(Segment::create(
                    id,
                    self.provider.as_ref(),
                    self.compression_level,
                )?);
                guard.active.insert(key.clone(), Arc::clone(&segment));
                segment
            }
        };

        Ok(SegmentWriter {
            _guard: RwLockWriteGuard::downgrade(guard),
            segment,
        })
    }

    /// Freezes the active generation and returns its number.
    ///
    /// All writes accepted before this call belong to the returned
    /// generation; all later writes land in the next one. Sealing an empty
    /// generation only advances the counter.
    pub fn seal(&self) -> Generation {
        let mut guard = self.inner.write();
        let sealed = guard.current;
        let active = std::mem::take(&mut guard.active);
        let count = active.len();
        if !active.is_empty() {
            guard.sealed.entry(sealed).or_default().extend(active);
        }
        guard.current += 1;

        debug!(generation = sealed, segments = count, "generation sealed");
        sealed
    }

    /// Returns the segments registered under a sealed generation.
    ///
    /// The active generation is never returned here.
    pub fn segments_of(&self, generation: Generation) -> BTreeMap<PartitionKey, Arc<Segment>> {
        let guard = self.inner.read();
        guard
            .sealed
            .get(&generation)
            .map(|segments| {
                segments
                    .iter()
                    .map(|(key, segment)| (key.clone(), Arc::clone(segment)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes one fully processed segment from a sealed generation.
    pub fn evict(&self, generation: Generation, key: &PartitionKey) -> Option<Arc<Segment>> {
        let mut guard = self.inner.write();
        let segments = guard.sealed.get_mut(&generation)?;
        let removed = segments.remove(key);
        if segments.is_empty() {
            guard.sealed.remove(&generation);
        }
        removed
    }

    /// The generation currently accepting writes.
    pub fn current_generation(&self) -> Generation {
        self.inner.read().current
    }

    /// Sealed generations that still hold segments, ascending.
    pub fn sealed_generations(&self) -> Vec<Generation> {
        self.inner.read().sealed.keys().copied().collect()
    }

    /// Total number of segments, active and sealed.
    pub fn segment_count(&self) -> usize {
        let guard = self.inner.read();
        guard.active.len() + guard.sealed.values().map(HashMap::len).sum::<usize>()
    }

    /// Returns true if no segment is registered.
    pub fn is_empty(&self) -> bool {
        self.segment_count() == 0
    }
}
