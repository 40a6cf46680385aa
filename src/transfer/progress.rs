//! Progress monitoring for the byte relay.
//!
//! [`monitor`] wraps the resolved byte stream so that every chunk passing
//! through updates a [`ProgressState`] and, at a bounded cadence, pushes a
//! [`ProgressSnapshot`] onto the status feed. Building the wrapper is
//! separate from consuming it: nothing is read and nothing is emitted until
//! the sink starts pulling the stream.
//!
//! Snapshot delivery never slows the byte path: emission uses `try_send` on
//! the bounded feed channel and drops snapshots when the consumer lags.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::backend::ByteStream;

use super::status::StatusUpdate;

/// Mutable progress bookkeeping, owned by one monitor for one transfer.
#[derive(Debug)]
pub struct ProgressState {
    total: Option<u64>,
    completed: u64,
    started: Instant,
}

impl ProgressState {
    fn new(total: Option<u64>) -> Self {
        Self {
            total,
            completed: 0,
            started: Instant::now(),
        }
    }

    fn record(&mut self, bytes: u64) {
        // completed is monotone; chunks only ever add.
        self.completed += bytes;
    }

    fn snapshot(&self, done: bool) -> ProgressSnapshot {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rate = (self.completed as f64 / secs) as u64;
            rate
        } else {
            0
        };

        let percent = self.total.filter(|total| *total > 0).map(|total| {
            #[allow(clippy::cast_possible_truncation)]
            let percent = (self.completed.min(total) * 100 / total) as u8;
            percent
        });

        let eta = match (self.total, rate) {
            (Some(total), rate) if rate > 0 && !done => {
                Some(Duration::from_secs(total.saturating_sub(self.completed) / rate))
            }
            _ => None,
        };

        ProgressSnapshot {
            total: self.total,
            completed: self.completed,
            percent,
            rate,
            eta,
            elapsed,
            done,
        }
    }
}

/// Point-in-time rendering of transfer completion.
///
/// `percent` and `eta` are omitted rather than guessed when the total is
/// unknown (or zero) or the rate has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Expected total bytes, when the source declared a length.
    pub total: Option<u64>,
    /// Bytes relayed so far. Never decreases across snapshots.
    pub completed: u64,
    /// Whole-number percent complete, absent when the total is unknown.
    pub percent: Option<u8>,
    /// Cumulative average rate in bytes per second.
    pub rate: u64,
    /// Estimated time remaining, absent when it cannot be derived.
    pub eta: Option<Duration>,
    /// Time since the transfer started.
    pub elapsed: Duration,
    /// True exactly once, on the terminal snapshot.
    pub done: bool,
}

/// Read-side handle on the monitor's state, retained by the relay.
///
/// The relay uses it to derive the terminal snapshot after the byte path has
/// finished, while the [`MonitoredStream`] itself is consumed by the sink.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    state: Arc<Mutex<ProgressState>>,
    target: Arc<str>,
}

impl ProgressHandle {
    /// Derives a snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self, done: bool) -> ProgressSnapshot {
        lock_state(&self.state).snapshot(done)
    }

    /// The sink target name this transfer reports under.
    #[must_use]
    pub fn target(&self) -> Arc<str> {
        Arc::clone(&self.target)
    }
}

/// Wraps a byte stream with progress accounting and periodic emission.
///
/// Returns the wrapping stream (hand it to the sink) and a handle for
/// deriving the terminal snapshot. `interval` bounds the emission cadence so
/// the feed is not flooded chunk-by-chunk.
pub fn monitor(
    inner: ByteStream,
    total: Option<u64>,
    target: &str,
    feed: mpsc::Sender<StatusUpdate>,
    interval: Duration,
) -> (MonitoredStream, ProgressHandle) {
    let state = Arc::new(Mutex::new(ProgressState::new(total)));
    let target: Arc<str> = Arc::from(target);
    let handle = ProgressHandle {
        state: Arc::clone(&state),
        target: Arc::clone(&target),
    };
    let stream = MonitoredStream {
        inner,
        state,
        target,
        feed,
        interval,
        last_emit: None,
    };
    (stream, handle)
}

/// Byte stream that updates progress state as chunks pass through.
/// Built by [`monitor`]; content is forwarded unaltered and unbuffered.
pub struct MonitoredStream {
    inner: ByteStream,
    state: Arc<Mutex<ProgressState>>,
    target: Arc<str>,
    feed: mpsc::Sender<StatusUpdate>,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Stream for MonitoredStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);

        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            let bytes = chunk.len() as u64;
            let now = Instant::now();
            let due = self
                .last_emit
                .is_none_or(|last| now.duration_since(last) >= self.interval);

            let snapshot = {
                let mut state = lock_state(&self.state);
                state.record(bytes);
                due.then(|| state.snapshot(false))
            };

            if let Some(snapshot) = snapshot {
                self.last_emit = Some(now);
                let update = StatusUpdate::Progress {
                    target: Arc::clone(&self.target),
                    snapshot,
                };
                // Dropped under backpressure instead of stalling the relay.
                if self.feed.try_send(update).is_err() {
                    trace!(target = %self.target, "status feed full, snapshot dropped");
                }
            }
        }

        polled
    }
}

fn lock_state(state: &Mutex<ProgressState>) -> MutexGuard<'_, ProgressState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
