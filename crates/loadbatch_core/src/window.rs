//! Window boundaries and the periodic window clock.

use crate::error::{LoaderError, LoaderResult};
use crossbeam::channel::{bounded, select, tick, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Truncates `now` to the start of its window, as a duration since the
/// unix epoch.
///
/// Every instant inside the same window maps to the same boundary, so the
/// boundary can be recomputed by anyone who knows the window duration. A
/// zero window leaves `now` unchanged.
pub fn window_start(now: SystemTime, window: Duration) -> Duration {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let window_nanos = window.as_nanos();
    if window_nanos == 0 {
        return since_epoch;
    }

    let nanos = since_epoch.as_nanos();
    let truncated = nanos - nanos % window_nanos;
    Duration::new(
        (truncated / NANOS_PER_SEC) as u64,
        (truncated % NANOS_PER_SEC) as u32,
    )
}

/// Unix seconds of the window boundary containing `now`.
pub fn window_start_secs(now: SystemTime, window: Duration) -> u64 {
    window_start(now, window).as_secs()
}

/// Background timer that fires once per window.
///
/// Ticks that are missed while the callback runs are coalesced into one.
/// Dropping the clock stops it and joins its thread.
pub struct WindowClock {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WindowClock {
    /// Starts a clock that calls `on_tick` every `window`.
    pub fn start<F>(window: Duration, mut on_tick: F) -> LoaderResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(window);
        let name = "loadbatch-window-clock".to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => on_tick(),
                    }
                }
                debug!("window clock stopped");
            })
            .map_err(|source| LoaderError::Spawn { name, source })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the clock and waits for an in-progress tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the stop channel wakes the select loop.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("window clock thread panicked");
            }
        }
    }
}

impl Drop for WindowClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}
