//! Counting gate bounding concurrent submissions.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A counting gate with a fixed number of slots.
///
/// `acquire` blocks until a slot is free. The returned permit releases its
/// slot when dropped and can be moved into the task that uses it.
#[derive(Debug)]
pub struct DispatchGate {
    max: usize,
    in_flight: Mutex<usize>,
    released: Condvar,
    peak: AtomicUsize,
}

/// A held slot of a [`DispatchGate`].
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<DispatchGate>,
}

impl DispatchGate {
    /// Creates a gate with `max` slots (at least one).
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            max: max.max(1),
            in_flight: Mutex::new(0),
            released: Condvar::new(),
            peak: AtomicUsize::new(0),
        })
    }

    /// Blocks until a slot is free and takes it.
    pub fn acquire(self: &Arc<Self>) -> GatePermit {
        let mut in_flight = self.in_flight.lock();
        while *in_flight >= self.max {
            self.released.wait(&mut in_flight);
        }
        *in_flight += 1;
        self.peak.fetch_max(*in_flight, Ordering::AcqRel);

        GatePermit {
            gate: Arc::clone(self),
        }
    }

    /// Takes a slot if one is free.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        let mut in_flight = self.in_flight.lock();
        if *in_flight >= self.max {
            return None;
        }
        *in_flight += 1;
        self.peak.fetch_max(*in_flight, Ordering::AcqRel);

        Some(GatePermit {
            gate: Arc::clone(self),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Highest number of slots ever held at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        self.released.notify_one();
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
