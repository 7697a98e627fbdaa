//! Sealing generations and dispatching their segments to the backend.
//!
//! Every segment of a sealed generation becomes one dispatch task running on
//! its own thread. The [`DispatchGate`] permit is taken before the thread is
//! spawned, so a full gate stalls the dispatcher rather than piling up idle
//! threads. Each task emits exactly one outcome and then evicts its segment
//! from the generation store.

use crate::backend::{LoadBackend, LoadOptions, LoadReceipt, LoadRequest};
use crate::config::{FailedSegmentPolicy, LoaderConfig};
use crate::error::{FailureCause, SegmentError, SegmentResult};
use crate::gate::{DispatchGate, GatePermit};
use crate::generation::GenerationStore;
use crate::key::Generation;
use crate::outcome::{LoadFailure, LoadResult, OutcomeSender};
use crate::segment::Segment;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Seals generations and runs their dispatch tasks.
pub struct Dispatcher {
    store: Arc<GenerationStore>,
    backend: Arc<dyn LoadBackend>,
    gate: Arc<DispatchGate>,
    options: LoadOptions,
    failed_segments: FailedSegmentPolicy,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `store`.
    pub fn new(
        store: Arc<GenerationStore>,
        backend: Arc<dyn LoadBackend>,
        config: &LoaderConfig,
    ) -> Self {
        Self {
            store,
            backend,
            gate: DispatchGate::new(config.max_jobs),
            options: config.load_options(),
            failed_segments: config.failed_segments,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the gate bounding concurrent submissions.
    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    /// Seals the active generation and dispatches every segment in it.
    ///
    /// Blocks while the gate is full. Returns the sealed generation.
    pub fn seal_and_dispatch(&self, outcomes: &OutcomeSender) -> Generation {
        let generation = self.store.seal();
        let dispatched = self.dispatch(generation, outcomes);
        if dispatched > 0 {
            info!(generation, segments = dispatched, "generation dispatched");
        } else {
            debug!(generation, "empty generation sealed");
        }
        generation
    }

    /// Dispatches the segments of a sealed generation. Returns how many tasks
    /// were started or failed to start.
    pub fn dispatch(&self, generation: Generation, outcomes: &OutcomeSender) -> usize {
        let segments = self.store.segments_of(generation);
        let count = segments.len();

        for (key, segment) in segments {
            let permit = self.gate.acquire();
            let task = DispatchTask {
                store: Arc::clone(&self.store),
                backend: Arc::clone(&self.backend),
                segment: Arc::clone(&segment),
                options: self.options.clone(),
                failed_segments: self.failed_segments,
                outcomes: outcomes.clone(),
                permit,
            };

            let spawned = thread::Builder::new()
                .name(format!("loadbatch-dispatch-{generation}"))
                .spawn(move || task.run());

            match spawned {
                Ok(handle) => self.track(handle),
                Err(e) => {
                    error!(segment = %segment.name(), error = %e, "failed to start dispatch task");
                    self.store.evict(generation, &key);
                    outcomes.failure(LoadFailure {
                        segment: Some(segment.name().to_string()),
                        key: Some(key),
                        generation: Some(generation),
                        size: 0,
                        duration: Duration::ZERO,
                        cause: FailureCause::Prepare(SegmentError::Io(e)),
                    });
                }
            }
        }

        count
    }

    /// Waits for every dispatch task started so far, including tasks started
    /// while waiting.
    pub fn join_all(&self) -> usize {
        let mut joined = 0;
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return joined;
            }
            for handle in batch {
                join_task(handle);
                joined += 1;
            }
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        let mut i = 0;
        while i < tasks.len() {
            if tasks[i].is_finished() {
                join_task(tasks.swap_remove(i));
            } else {
                i += 1;
            }
        }
        tasks.push(handle);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("gate", &self.gate)
            .field("failed_segments", &self.failed_segments)
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

fn join_task(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("dispatch task panicked");
    }
}

/// Delivery of one segment.
struct DispatchTask {
    store: Arc<GenerationStore>,
    backend: Arc<dyn LoadBackend>,
    segment: Arc<Segment>,
    options: LoadOptions,
    failed_segments: FailedSegmentPolicy,
    outcomes: OutcomeSender,
    permit: GatePermit,
}

impl DispatchTask {
    fn run(self) {
        let (size, duration, result) = self.submit();
        self.store
            .evict(self.segment.generation(), self.segment.key());

        let DispatchTask {
            segment,
            outcomes,
            permit,
            ..
        } = self;
        drop(permit);

        match result {
            Ok(receipt) => {
                info!(
                    segment = %segment.name(),
                    size,
                    records = segment.records(),
                    ?duration,
                    "segment loaded"
                );
                outcomes.success(LoadResult {
                    segment: segment.name().to_string(),
                    key: segment.key().clone(),
                    generation: segment.generation(),
                    size,
                    records: segment.records(),
                    duration,
                    job_id: receipt.job_id,
                });
            }
            Err(cause) => {
                warn!(segment = %segment.name(), size, error = %cause, "segment load failed");
                outcomes.failure(LoadFailure {
                    segment: Some(segment.name().to_string()),
                    key: Some(segment.key().clone()),
                    generation: Some(segment.generation()),
                    size,
                    duration,
                    cause,
                });
            }
        }
    }

    /// Finishes, submits and releases the segment.
    fn submit(&self) -> (u64, Duration, Result<LoadReceipt, FailureCause>) {
        let size = match self.segment.finish() {
            Ok(size) => size,
            Err(e) => {
                self.dispose_failed();
                return (0, Duration::ZERO, Err(FailureCause::Prepare(e)));
            }
        };
        let started = Instant::now();

        let content = match self.segment.contents() {
            Ok(content) => content,
            Err(e) => {
                self.dispose_failed();
                return (size, started.elapsed(), Err(FailureCause::Prepare(e)));
            }
        };

        let request = LoadRequest {
            segment: self.segment.name().to_string(),
            destination: self.segment.key().clone(),
            size,
            records: self.segment.records(),
            content,
            options: self.options.clone(),
        };

        let result = match self.backend.load(&request) {
            Ok(receipt) => self.release().map(|()| receipt).map_err(FailureCause::Release),
            Err(e) => {
                self.dispose_failed();
                Err(FailureCause::Submit(e))
            }
        };
        (size, started.elapsed(), result)
    }

    fn release(&self) -> SegmentResult<()> {
        self.segment.finalize()?;
        self.segment.discard()
    }

    fn dispose_failed(&self) {
        let disposed = match self.failed_segments {
            FailedSegmentPolicy::Retain => self.segment.finalize(),
            FailedSegmentPolicy::Discard => self.segment.discard(),
        };
        if let Err(e) = disposed {
            warn!(
                segment = %self.segment.name(),
                policy = ?self.failed_segments,
                error = %e,
                "failed to dispose of failed segment"
            );
        }
    }
}
