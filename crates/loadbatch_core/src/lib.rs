//! # loadbatch core
//!
//! Windowed buffering and concurrent bulk-load dispatch.
//!
//! Records carry a [`PartitionKey`] naming their destination. Ingestion
//! workers append each record to the segment for its key in the **active
//! generation**. Every window the active generation is sealed, and each of
//! its segments is shipped to a [`LoadBackend`] by its own dispatch task,
//! with at most `max_jobs` submissions in flight.
//!
//! ## Guarantees
//!
//! - A record accepted by a writer before a seal belongs to the sealed
//!   generation; later records land in the next one
//! - Each sealed segment yields exactly one outcome, on either the success
//!   or the failure channel
//! - After [`Loader::close`] returns, every queued record has been
//!   dispatched and both outcome channels are disconnected
//!
//! ## Segment layout
//!
//! A segment is a single zstd frame of newline-delimited JSON, named
//! `{window_start}-{generation}-{primary}-{secondary}` with both key parts
//! percent-escaped. Spool resources are created exclusively; a name left by
//! an earlier run gets a `-{n}` suffix instead of being reopened.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod dispatch;
mod error;
mod gate;
mod generation;
mod ingest;
mod key;
mod loader;
mod outcome;
mod record;
mod segment;
mod window;

pub use backend::{
    Compression, LoadBackend, LoadOptions, LoadReceipt, LoadRequest, MockBackend, SchemaField,
    SourceFormat, TableSchema,
};
pub use config::{FailedSegmentPolicy, LoaderConfig};
pub use dispatch::Dispatcher;
pub use error::{
    BackendError, FailureCause, LoaderError, LoaderResult, SegmentError, SegmentResult,
    TrySubmitError,
};
pub use gate::{DispatchGate, GatePermit};
pub use generation::{GenerationStore, SegmentWriter};
pub use ingest::IngestPool;
pub use key::{Generation, PartitionKey, SegmentId};
pub use loader::Loader;
pub use outcome::{outcome_channels, LoadFailure, LoadResult, OutcomeReceiver, OutcomeSender};
pub use record::{Record, Row};
pub use segment::{decode_records, Segment};
pub use window::{window_start, window_start_secs, WindowClock};
