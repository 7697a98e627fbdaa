//! The loader: the public face of the engine.

use crate::backend::LoadBackend;
use crate::config::LoaderConfig;
use crate::dispatch::Dispatcher;
use crate::error::{LoaderError, LoaderResult, TrySubmitError};
use crate::gate::DispatchGate;
use crate::generation::GenerationStore;
use crate::ingest::IngestPool;
use crate::key::Generation;
use crate::outcome::{outcome_channels, LoadFailure, LoadResult, OutcomeReceiver, OutcomeSender};
use crate::record::Record;
use crate::window::WindowClock;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use loadbatch_storage::{FileProvider, StorageProvider};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// Buffers records into per-key segments, seals them every window and
/// submits each segment to a [`LoadBackend`].
///
/// Outcomes arrive on two channels that stay open until [`Loader::close`]
/// has delivered the last one. Both must be drained: dispatch tasks block
/// when an outcome buffer is full.
///
/// # Example
///
/// ```rust,no_run
/// use loadbatch_core::{Loader, LoaderConfig, MockBackend, PartitionKey, Row};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = LoaderConfig::new()
///     .with_window(Duration::from_secs(5))
///     .with_dir("/tmp/loadbatch");
/// let loader = Loader::open(config, Arc::new(MockBackend::new())).unwrap();
///
/// let key = PartitionKey::new("events", "clicks");
/// loader.submit(Row::new(key, serde_json::json!({ "x": 1 }))).unwrap();
///
/// let successes = loader.successes();
/// std::thread::spawn(move || for result in successes.iter() {
///     println!("{} loaded", result.segment);
/// });
/// loader.close();
/// ```
pub struct Loader<R: Record> {
    // Drop order matters: receivers go first so that a clock thread still
    // dispatching never blocks on a full outcome buffer.
    input: RwLock<Option<Sender<R>>>,
    receivers: OutcomeReceiver,
    clock: Mutex<Option<WindowClock>>,
    ingest: Mutex<Option<IngestPool>>,
    outcomes: Mutex<Option<OutcomeSender>>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<GenerationStore>,
    config: LoaderConfig,
}

impl<R: Record> Loader<R> {
    /// Starts a loader spooling segments as files under `config.dir`.
    pub fn open(config: LoaderConfig, backend: Arc<dyn LoadBackend>) -> LoaderResult<Self> {
        let provider = Arc::new(FileProvider::new(config.dir.clone()));
        Self::with_provider(config, backend, provider)
    }

    /// Starts a loader spooling segments into `provider`.
    pub fn with_provider(
        config: LoaderConfig,
        backend: Arc<dyn LoadBackend>,
        provider: Arc<dyn StorageProvider>,
    ) -> LoaderResult<Self> {
        config.validate()?;

        let store = Arc::new(GenerationStore::new(
            provider,
            config.window,
            config.compression_level,
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), backend, &config));
        let (outcomes, receivers) = outcome_channels(config.buffer_size);
        let (input, queue): (Sender<R>, Receiver<R>) = bounded(config.buffer_size);

        let ingest = IngestPool::start(config.workers, queue, Arc::clone(&store), outcomes.clone())?;

        let clock = {
            let dispatcher = Arc::clone(&dispatcher);
            let outcomes = outcomes.clone();
            WindowClock::start(config.window, move || {
                dispatcher.seal_and_dispatch(&outcomes);
            })
        };
        let clock = match clock {
            Ok(clock) => clock,
            Err(e) => {
                drop(input);
                ingest.join();
                return Err(e);
            }
        };

        info!(
            window = ?config.window,
            workers = config.workers,
            max_jobs = config.max_jobs,
            buffer_size = config.buffer_size,
            "loader started"
        );

        Ok(Self {
            input: RwLock::new(Some(input)),
            receivers,
            clock: Mutex::new(Some(clock)),
            ingest: Mutex::new(Some(ingest)),
            outcomes: Mutex::new(Some(outcomes)),
            dispatcher,
            store,
            config,
        })
    }

    /// Returns the configuration the loader was started with.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Queues a record, blocking while the input queue is full.
    pub fn submit(&self, record: R) -> LoaderResult<()> {
        let sender = self.input.read().clone().ok_or(LoaderError::Closed)?;
        sender.send(record).map_err(|_| LoaderError::Closed)
    }

    /// Queues a record without blocking.
    pub fn try_submit(&self, record: R) -> Result<(), TrySubmitError<R>> {
        let Some(sender) = self.input.read().clone() else {
            return Err(TrySubmitError::Closed(record));
        };
        sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(record) => TrySubmitError::Full(record),
            TrySendError::Disconnected(record) => TrySubmitError::Closed(record),
        })
    }

    /// Channel of delivered segments. Disconnects after [`Loader::close`].
    pub fn successes(&self) -> Receiver<LoadResult> {
        self.receivers.successes.clone()
    }

    /// Channel of failed records and segments. Disconnects after
    /// [`Loader::close`].
    pub fn failures(&self) -> Receiver<LoadFailure> {
        self.receivers.failures.clone()
    }

    /// Seals the active generation now instead of waiting for the next tick.
    ///
    /// Returns `None` once the loader is closed. A concurrent
    /// [`Loader::close`] waits until every segment of this generation has
    /// been handed to a dispatch task.
    pub fn seal_and_dispatch(&self) -> Option<Generation> {
        // Held across the dispatch so close cannot take the sender meanwhile.
        let outcomes = self.outcomes.lock();
        let sender = outcomes.as_ref()?;
        Some(self.dispatcher.seal_and_dispatch(sender))
    }

    /// The generation store, for inspection.
    pub fn generation_store(&self) -> &GenerationStore {
        &self.store
    }

    /// The gate bounding concurrent submissions.
    pub fn gate(&self) -> &DispatchGate {
        self.dispatcher.gate()
    }

    /// Returns true once [`Loader::close`] has started.
    pub fn is_closed(&self) -> bool {
        self.input.read().is_none()
    }

    /// Flushes everything and stops.
    ///
    /// Stops the window clock, closes the input queue, waits for the
    /// ingestion workers to drain it, dispatches the final generation and
    /// waits for every dispatch task. The outcome channels disconnect once
    /// the last outcome has been sent. Calling this again is a no-op.
    pub fn close(&self) {
        let clock = self.clock.lock().take();
        if let Some(clock) = clock {
            clock.stop();
            debug!("window clock stopped");
        }

        drop(self.input.write().take());

        let ingest = self.ingest.lock().take();
        if let Some(ingest) = ingest {
            ingest.join();
            debug!("ingest workers drained");
        }

        let outcomes = self.outcomes.lock().take();
        let Some(outcomes) = outcomes else {
            return;
        };
        let generation = self.dispatcher.seal_and_dispatch(&outcomes);
        let joined = self.dispatcher.join_all();
        drop(outcomes);

        info!(
            final_generation = generation,
            tasks = joined,
            "loader closed"
        );
    }
}

impl<R: Record> std::fmt::Debug for Loader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("generation", &self.store.current_generation())
            .finish()
    }
}
