//! Ingestion workers.

use crate::error::{FailureCause, LoaderError, LoaderResult, SegmentResult};
use crate::generation::GenerationStore;
use crate::outcome::{LoadFailure, OutcomeSender};
use crate::record::Record;
use crossbeam::channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// A fixed set of threads moving records from the input queue into
/// segments of the active generation.
///
/// Workers exit once the queue is disconnected and drained.
pub struct IngestPool {
    handles: Vec<JoinHandle<()>>,
}

impl IngestPool {
    /// Starts `workers` threads consuming `input`.
    pub fn start<R: Record>(
        workers: usize,
        input: Receiver<R>,
        store: Arc<GenerationStore>,
        outcomes: OutcomeSender,
    ) -> LoaderResult<Self> {
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let name = format!("loadbatch-ingest-{id}");
            let input = input.clone();
            let store = Arc::clone(&store);
            let outcomes = outcomes.clone();

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(id, &input, &store, &outcomes))
                .map_err(|source| LoaderError::Spawn { name, source })?;
            handles.push(handle);
        }

        Ok(Self { handles })
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    ///
    /// Returns only after the input queue has been disconnected.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("ingest worker panicked");
            }
        }
    }
}

fn run_worker<R: Record>(
    id: usize,
    input: &Receiver<R>,
    store: &GenerationStore,
    outcomes: &OutcomeSender,
) {
    let mut written = 0u64;

    for record in input.iter() {
        match write_record(store, &record) {
            Ok(()) => written += 1,
            Err(source) => {
                let key = record.partition_key().clone();
                warn!(worker = id, %key, error = %source, "failed to write record");
                outcomes.failure(LoadFailure {
                    segment: None,
                    key: Some(key.clone()),
                    generation: None,
                    size: 1,
                    duration: Duration::ZERO,
                    cause: FailureCause::Ingest { key, source },
                });
            }
        }
    }

    debug!(worker = id, written, "ingest worker drained");
}

fn write_record<R: Record>(store: &GenerationStore, record: &R) -> SegmentResult<()> {
    let writer = store.allocate_or_get_writer(record.partition_key())?;
    writer.append(record.payload())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PartitionKey;
    use crate::outcome::outcome_channels;
    use crate::record::Row;
    use loadbatch_storage::{InMemoryProvider, StorageProvider};
    use serde_json::json;

    /// Refuses to create any backend.
    struct BrokenProvider;

    impl StorageProvider for BrokenProvider {
        fn create(
            &self,
            name: &str,
        ) -> loadbatch_storage::StorageResult<Box<dyn loadbatch_storage::StorageBackend>> {
            Err(loadbatch_storage::StorageError::InvalidName {
                name: name.to_string(),
                reason: "broken provider",
            })
        }
    }

    fn row(table: &str, n: u64) -> Row {
        Row::new(PartitionKey::new("ds", table), json!({ "n": n }))
    }

    #[test]
    fn workers_drain_queue_then_exit() {
        let store = Arc::new(GenerationStore::new(
            Arc::new(InMemoryProvider::new()),
            Duration::from_secs(60),
            1,
        ));
        let (tx, rx) = crossbeam::channel::bounded(8);
        let (outcomes, receivers) = outcome_channels(8);

        let pool = IngestPool::start(3, rx, Arc::clone(&store), outcomes).unwrap();
        assert_eq!(pool.len(), 3);

        for n in 0..30 {
            tx.send(row(if n % 2 == 0 { "even" } else { "odd" }, n)).unwrap();
        }
        drop(tx);
        pool.join();

        let g = store.seal();
        let segments = store.segments_of(g);
        assert_eq!(segments.len(), 2);
        let total: u64 = segments.values().map(|s| s.records()).sum();
        assert_eq!(total, 30);
        assert!(receivers.failures.try_recv().is_err());
    }

    #[test]
    fn write_failures_become_degenerate_outcomes() {
        let store = Arc::new(GenerationStore::new(
            Arc::new(BrokenProvider),
            Duration::from_secs(60),
            1,
        ));
        let (tx, rx) = crossbeam::channel::bounded(8);
        let (outcomes, receivers) = outcome_channels(8);

        let pool = IngestPool::start(1, rx, store, outcomes).unwrap();
        tx.send(row("t", 1)).unwrap();
        tx.send(row("t", 2)).unwrap();
        drop(tx);
        pool.join();

        let failures: Vec<_> = receivers.failures.try_iter().collect();
        assert_eq!(failures.len(), 2);
        for failure in failures {
            assert_eq!(failure.size, 1);
            assert!(failure.segment.is_none());
            assert_eq!(failure.key, Some(PartitionKey::new("ds", "t")));
            assert!(matches!(failure.cause, FailureCause::Ingest { .. }));
        }
    }
}
