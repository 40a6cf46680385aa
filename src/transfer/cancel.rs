//! Cancellation gate: one trigger from two independent sources.
//!
//! A [`CancellationGate`] combines a fixed deadline timer with the caller's
//! own cancellation signal into a single [`CancellationToken`]. Either source
//! firing aborts the in-flight byte relay; whichever fires first wins and the
//! other source can no longer fire or leak. The gate is a one-shot latch:
//! later triggers are no-ops.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::backend::ByteStream;

/// Which of the gate's two sources fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The fixed deadline timer expired.
    Deadline,
    /// The caller's own request lifecycle ended early.
    Caller,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deadline => f.write_str("deadline expired"),
            Self::Caller => f.write_str("caller disconnected"),
        }
    }
}

/// Deadline timer and caller signal composed into one trigger.
///
/// Owned by the relay for the duration of one transfer. Dropping the gate
/// (or calling [`disarm`](Self::disarm)) clears the watcher so the deadline
/// timer cannot fire after the transfer already finished.
#[derive(Debug)]
pub struct CancellationGate {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
    watcher: JoinHandle<()>,
}

impl CancellationGate {
    /// Arms the gate: starts the deadline timer and watches the caller token.
    ///
    /// The first source to fire records its [`CancelCause`] and cancels the
    /// combined token; the watcher then exits, which is what clears the
    /// losing source.
    #[must_use]
    pub fn new(deadline: Duration, caller: CancellationToken) -> Self {
        let token = CancellationToken::new();
        let cause = Arc::new(OnceLock::new());

        let watcher = tokio::spawn({
            let token = token.clone();
            let cause = Arc::clone(&cause);
            async move {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => {
                        debug!(deadline_secs = deadline.as_secs(), "cancellation gate: deadline fired");
                        let _ = cause.set(CancelCause::Deadline);
                        token.cancel();
                    }
                    () = caller.cancelled() => {
                        debug!("cancellation gate: caller signal fired");
                        let _ = cause.set(CancelCause::Caller);
                        token.cancel();
                    }
                    () = token.cancelled() => {}
                }
            }
        });

        Self {
            token,
            cause,
            watcher,
        }
    }

    /// A clone of the combined token for wiring into the byte path.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true once either source has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The source that fired, once one has.
    #[must_use]
    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    /// Clears the deadline timer and caller watch without cancelling.
    ///
    /// Called when the transfer finishes on its own; idempotent.
    pub fn disarm(&self) {
        self.watcher.abort();
    }
}

impl Drop for CancellationGate {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Wraps a byte stream so the gate firing aborts the in-flight read.
///
/// On cancellation the stream yields one `io::ErrorKind::Interrupted` error
/// and then terminates; no further chunks are read from the source. The
/// relay distinguishes this from a genuine source error via
/// [`CancellationGate::cause`].
pub fn gated(inner: ByteStream, token: CancellationToken) -> GatedStream {
    GatedStream {
        inner,
        cancelled: Box::pin(token.cancelled_owned()),
        fired: false,
    }
}

/// Byte stream bounded by a cancellation token. Built by [`gated`].
pub struct GatedStream {
    inner: ByteStream,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    fired: bool,
}

impl Stream for GatedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.fired {
            return Poll::Ready(None);
        }
        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.fired = true;
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "transfer cancelled",
            ))));
        }
        self.inner.as_mut().poll_next(cx)
    }
}
