//! Per-segment outcomes and the two channels that carry them.

use crate::error::FailureCause;
use crate::key::{Generation, PartitionKey};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::time::Duration;
use tracing::warn;

/// A segment that was loaded and released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Segment name.
    pub segment: String,
    /// Destination.
    pub key: PartitionKey,
    /// Generation the segment belonged to.
    pub generation: Generation,
    /// Compressed size submitted.
    pub size: u64,
    /// Records in the segment.
    pub records: u64,
    /// Time spent loading and releasing.
    pub duration: Duration,
    /// Backend job identifier.
    pub job_id: Option<String>,
}

/// A record or segment that did not make it.
///
/// Ingest failures carry no segment identity and a size of one record.
#[derive(Debug)]
pub struct LoadFailure {
    /// Segment name, absent for ingest failures.
    pub segment: Option<String>,
    /// Destination, when known.
    pub key: Option<PartitionKey>,
    /// Generation, absent for ingest failures.
    pub generation: Option<Generation>,
    /// Compressed size, or 1 for a single rejected record.
    pub size: u64,
    /// Time spent before the failure.
    pub duration: Duration,
    /// What went wrong.
    pub cause: FailureCause,
}

/// Sending half of both outcome channels.
#[derive(Debug, Clone)]
pub struct OutcomeSender {
    successes: Sender<LoadResult>,
    failures: Sender<LoadFailure>,
}

/// Receiving half of both outcome channels.
#[derive(Debug, Clone)]
pub struct OutcomeReceiver {
    /// Delivered segments.
    pub successes: Receiver<LoadResult>,
    /// Failed records and segments.
    pub failures: Receiver<LoadFailure>,
}

/// Creates both outcome channels, each buffering `capacity` outcomes.
///
/// Senders block once a buffer is full, so the receiving side must keep
/// draining both channels.
pub fn outcome_channels(capacity: usize) -> (OutcomeSender, OutcomeReceiver) {
    let (success_tx, success_rx) = bounded(capacity);
    let (failure_tx, failure_rx) = bounded(capacity);
    (
        OutcomeSender {
            successes: success_tx,
            failures: failure_tx,
        },
        OutcomeReceiver {
            successes: success_rx,
            failures: failure_rx,
        },
    )
}

impl OutcomeSender {
    /// Reports a delivered segment.
    pub fn success(&self, result: LoadResult) {
        if self.successes.send(result).is_err() {
            warn!("success receiver dropped, outcome lost");
        }
    }

    /// Reports a failure.
    pub fn failure(&self, failure: LoadFailure) {
        if self.failures.send(failure).is_err() {
            warn!("failure receiver dropped, outcome lost");
        }
    }
}
