//! Relay engine: the pipeline that moves bytes from a resolved source to a
//! sink.
//!
//! [`RelayEngine::start`] returns a [`StatusFeed`] immediately and runs the
//! transfer as one spawned task. The transfer is fire-and-forget with respect
//! to the caller's connection: it runs to completion or cancellation whether
//! or not the feed is still being read, except that the caller's own token is
//! one of the cancellation gate's two triggers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::backend::BackendChain;
use crate::config::RelayConfig;
use crate::sink::Sink;

use super::cancel::{self, CancelCause, CancellationGate};
use super::progress::{self, ProgressSnapshot};
use super::status::StatusUpdate;
use super::{TransferError, TransferRequest, target_name};

/// Caller-facing sequence of status updates for one transfer.
///
/// Updates arrive in non-decreasing completed-bytes order and end with
/// exactly one terminal update; the feed closes after it.
#[derive(Debug)]
pub struct StatusFeed {
    rx: mpsc::Receiver<StatusUpdate>,
}

impl StatusFeed {
    /// Receives the next update; `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        self.rx.recv().await
    }

    /// Unwraps the underlying channel receiver.
    #[must_use]
    pub fn into_inner(self) -> mpsc::Receiver<StatusUpdate> {
        self.rx
    }
}

/// Connects the backend chain, progress monitor, cancellation gate, and sink
/// into runnable transfers.
///
/// The engine itself is cheap to clone across callers; every started
/// transfer owns its own gate, monitor, and feed, sharing no mutable state
/// with concurrent transfers.
#[derive(Clone)]
pub struct RelayEngine {
    chain: Arc<BackendChain>,
    sink: Arc<dyn Sink>,
    config: RelayConfig,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("chain", &self.chain)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RelayEngine {
    /// Creates an engine over a resolved chain and a sink.
    #[must_use]
    pub fn new(chain: BackendChain, sink: Arc<dyn Sink>, config: RelayConfig) -> Self {
        Self {
            chain: Arc::new(chain),
            sink,
            config,
        }
    }

    /// Starts one transfer and returns its live status feed immediately.
    ///
    /// `caller` is the caller's own cancellation signal (request lifecycle
    /// ending early); it is composed with the configured deadline into the
    /// transfer's cancellation gate.
    #[must_use]
    pub fn start(&self, request: TransferRequest, caller: CancellationToken) -> StatusFeed {
        let (tx, rx) = mpsc::channel(self.config.status_capacity.max(1));
        tokio::spawn(run_transfer(
            Arc::clone(&self.chain),
            Arc::clone(&self.sink),
            self.config.clone(),
            request,
            caller,
            tx,
        ));
        StatusFeed { rx }
    }
}

/// One complete transfer: resolve, relay, classify the terminal outcome.
///
/// Every failure ends in a terminal feed message; nothing escapes the task.
#[instrument(skip_all, fields(source = %request.source()))]
async fn run_transfer(
    chain: Arc<BackendChain>,
    sink: Arc<dyn Sink>,
    config: RelayConfig,
    request: TransferRequest,
    caller: CancellationToken,
    tx: mpsc::Sender<StatusUpdate>,
) {
    let gate = CancellationGate::new(config.deadline, caller);
    let started = Instant::now();

    // The gate bounds resolution too; a hung candidate must not outlive the
    // deadline.
    let gate_token = gate.token();
    let resolved = tokio::select! {
        resolved = chain.resolve(&request) => resolved,
        () = gate_token.cancelled() => {
            // The watcher records the cause before firing the token.
            let cause = gate.cause().unwrap_or(CancelCause::Deadline);
            info!(%cause, "transfer cancelled during resolution");
            send_terminal(
                &tx,
                StatusUpdate::Cancelled {
                    target: Arc::from(target_name(request.source())),
                    cause,
                    snapshot: idle_snapshot(started.elapsed()),
                },
            )
            .await;
            return;
        }
    };
    let response = match resolved {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "resolution failed");
            send_terminal(&tx, failed(TransferError::from(error))).await;
            return;
        }
    };

    // The chain's checks normally guarantee a success status; handled
    // defensively so a misbehaving candidate still ends in a clean terminal.
    if !response.status.is_success() {
        let error = TransferError::UpstreamStatus {
            status: response.status.as_u16(),
        };
        warn!(status = response.status.as_u16(), "accepted source answered non-success");
        send_terminal(&tx, failed(error)).await;
        return;
    }

    let target = target_name(&response.final_url);
    let total = response.content_length;
    info!(target = %target, total, "relay started");

    let gated = cancel::gated(response.body, gate.token());
    let (monitored, handle) = progress::monitor(
        gated.boxed(),
        total,
        &target,
        tx.clone(),
        config.snapshot_interval,
    );

    let result = sink.store(&target, monitored.boxed()).await;
    gate.disarm();

    let terminal = match result {
        Ok(bytes_written) => {
            info!(target = %target, bytes_written, "relay completed");
            StatusUpdate::Progress {
                target: handle.target(),
                snapshot: handle.snapshot(true),
            }
        }
        Err(error) => match gate.cause() {
            Some(cause) => {
                info!(target = %target, %cause, "relay cancelled");
                StatusUpdate::Cancelled {
                    target: handle.target(),
                    cause,
                    snapshot: handle.snapshot(false),
                }
            }
            None => {
                warn!(target = %target, error = %error, "relay failed");
                failed(TransferError::from(error))
            }
        },
    };

    send_terminal(&tx, terminal).await;
}

/// Snapshot for a transfer cancelled before any bytes flowed.
fn idle_snapshot(elapsed: Duration) -> ProgressSnapshot {
    ProgressSnapshot {
        total: None,
        completed: 0,
        percent: None,
        rate: 0,
        eta: None,
        elapsed,
        done: false,
    }
}

fn failed(error: TransferError) -> StatusUpdate {
    StatusUpdate::Failed {
        message: error.to_string(),
    }
}

/// Delivers the terminal update. Awaited (unlike periodic snapshots) so it
/// is never dropped while a consumer exists; a gone consumer is ignored.
async fn send_terminal(tx: &mpsc::Sender<StatusUpdate>, update: StatusUpdate) {
    let _ = tx.send(update).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use reqwest::StatusCode;
    use url::Url;

    use super::*;
    use crate::backend::{
        Backend, BackendError, ByteStream, FailurePolicy, FetchOutcome, SourceResponse,
    };
    use crate::sink::SinkError;
    use crate::transfer::cancel::CancelCause;

    // ==================== Test doubles ====================

    struct StubBackend {
        final_url: &'static str,
        content_length: Option<u64>,
        status: StatusCode,
        chunks: Vec<&'static [u8]>,
        hang_after_chunks: bool,
    }

    impl StubBackend {
        fn ok(chunks: Vec<&'static [u8]>, content_length: Option<u64>) -> Self {
            Self {
                final_url: "https://cdn.example.com/archive%20one.rar",
                content_length,
                status: StatusCode::OK,
                chunks,
                hang_after_chunks: false,
            }
        }
    }

    #[async_trait]
    impl Backend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(
            &self,
            _request: &TransferRequest,
        ) -> Result<FetchOutcome, BackendError> {
            let items: Vec<io::Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect();
            let body: ByteStream = if self.hang_after_chunks {
                stream::iter(items).chain(stream::pending()).boxed()
            } else {
                stream::iter(items).boxed()
            };
            Ok(FetchOutcome::Accepted(SourceResponse::from_parts(
                self.status,
                Url::parse(self.final_url).unwrap(),
                self.content_length,
                Some("application/octet-stream"),
                body,
            )))
        }
    }

    struct DecliningBackend;

    #[async_trait]
    impl Backend for DecliningBackend {
        fn name(&self) -> &str {
            "declining"
        }

        async fn fetch(
            &self,
            _request: &TransferRequest,
        ) -> Result<FetchOutcome, BackendError> {
            Ok(FetchOutcome::declined("host not supported"))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        data: Mutex<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl MemorySink {
        fn bytes(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for MemorySink {
        async fn store(&self, _name: &str, mut body: ByteStream) -> Result<u64, SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|source| SinkError::Source { source })?;
                written += chunk.len() as u64;
                self.data.lock().unwrap().extend_from_slice(&chunk);
            }
            Ok(written)
        }
    }

    fn engine_with(backend: Box<dyn Backend>, sink: Arc<MemorySink>) -> RelayEngine {
        let mut chain = BackendChain::new(FailurePolicy::default());
        chain.register(backend);
        RelayEngine::new(
            chain,
            sink,
            RelayConfig {
                snapshot_interval: Duration::from_millis(0),
                ..RelayConfig::default()
            },
        )
    }

    fn request() -> TransferRequest {
        TransferRequest::new("https://rapidgator.net/file/abc/archive.rar", None).unwrap()
    }

    async fn drain(feed: &mut StatusFeed) -> Vec<StatusUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = feed.recv().await {
            updates.push(update);
        }
        updates
    }

    // ==================== Scenarios ====================

    #[tokio::test]
    async fn test_relay_success_terminal_done_after_all_bytes() {
        let sink = Arc::new(MemorySink::default());
        let engine = engine_with(
            Box::new(StubBackend::ok(vec![&[0u8; 500], &[1u8; 500]], Some(1000))),
            Arc::clone(&sink),
        );

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert_eq!(sink.bytes().len(), 1000);

        let last = updates.last().unwrap();
        let StatusUpdate::Progress { target, snapshot } = last else {
            panic!("terminal should be a done snapshot, got {last:?}");
        };
        assert!(snapshot.done);
        assert_eq!(snapshot.completed, 1000);
        assert_eq!(snapshot.percent, Some(100));
        // Target name comes from the final URL path, percent-decoded.
        assert_eq!(target.as_ref(), "archive one.rar");

        // Exactly one terminal update, and it is last.
        let terminals = updates.iter().filter(|u| u.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_relay_midway_snapshot_shows_half_percent() {
        let sink = Arc::new(MemorySink::default());
        let engine = engine_with(
            Box::new(StubBackend::ok(vec![&[0u8; 500], &[1u8; 500]], Some(1000))),
            Arc::clone(&sink),
        );

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert!(
            updates.iter().any(|u| matches!(
                u,
                StatusUpdate::Progress { snapshot, .. }
                    if snapshot.completed == 500 && snapshot.percent == Some(50)
            )),
            "expected a 50% snapshot after the first 500 bytes"
        );
    }

    #[tokio::test]
    async fn test_relay_all_decline_reports_failed_without_sink_write() {
        let sink = Arc::new(MemorySink::default());
        let mut chain = BackendChain::default();
        chain.register(Box::new(DecliningBackend));
        chain.register(Box::new(DecliningBackend));
        let engine = RelayEngine::new(chain, sink.clone(), RelayConfig::default());

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], StatusUpdate::Failed { message }
            if message.contains("no backend accepted")));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_relay_html_payload_reports_failed_without_sink_write() {
        struct HtmlBackend;

        #[async_trait]
        impl Backend for HtmlBackend {
            fn name(&self) -> &str {
                "html"
            }

            async fn fetch(
                &self,
                _request: &TransferRequest,
            ) -> Result<FetchOutcome, BackendError> {
                Ok(FetchOutcome::Accepted(SourceResponse::from_parts(
                    StatusCode::OK,
                    Url::parse("https://hoster.example.com/error").unwrap(),
                    None,
                    Some("text/html"),
                    stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"<html>"))])
                        .boxed(),
                )))
            }
        }

        let sink = Arc::new(MemorySink::default());
        let engine = engine_with(Box::new(HtmlBackend), Arc::clone(&sink));

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert!(matches!(&updates[0], StatusUpdate::Failed { message }
            if message.contains("unsupported content")));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_relay_defensive_non_success_status() {
        let sink = Arc::new(MemorySink::default());
        let backend = StubBackend {
            status: StatusCode::BAD_GATEWAY,
            ..StubBackend::ok(vec![], None)
        };
        let engine = engine_with(Box::new(backend), Arc::clone(&sink));

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert!(matches!(&updates[0], StatusUpdate::Failed { message }
            if message.contains("502")));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_relay_external_cancel_leaves_partial_bytes() {
        let sink = Arc::new(MemorySink::default());
        let backend = StubBackend {
            content_length: None,
            hang_after_chunks: true,
            ..StubBackend::ok(vec![b"partial data "], None)
        };
        let engine = engine_with(Box::new(backend), Arc::clone(&sink));

        let caller = CancellationToken::new();
        let mut feed = engine.start(request(), caller.clone());

        // Let the first chunk flow, then end the caller's interaction.
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.cancel();

        let updates = drain(&mut feed).await;
        let last = updates.last().unwrap();
        assert!(
            matches!(last, StatusUpdate::Cancelled { cause: CancelCause::Caller, .. }),
            "terminal should be Cancelled, got {last:?}"
        );
        assert_eq!(sink.bytes(), b"partial data ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_deadline_cancels_hung_source() {
        let sink = Arc::new(MemorySink::default());
        let backend = StubBackend {
            hang_after_chunks: true,
            ..StubBackend::ok(vec![b"x"], None)
        };
        let mut chain = BackendChain::default();
        chain.register(Box::new(backend));
        let engine = RelayEngine::new(
            chain,
            sink.clone(),
            RelayConfig {
                deadline: Duration::from_millis(100),
                snapshot_interval: Duration::from_millis(0),
                ..RelayConfig::default()
            },
        );

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        let cancelled = updates
            .iter()
            .filter(|u| matches!(u, StatusUpdate::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 1, "deadline must produce exactly one terminal");
        assert!(matches!(
            updates.last().unwrap(),
            StatusUpdate::Cancelled {
                cause: CancelCause::Deadline,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_deadline_bounds_resolution() {
        // A candidate that never answers; the gate must still produce a
        // terminal update at the deadline.
        struct HangingBackend;

        #[async_trait]
        impl Backend for HangingBackend {
            fn name(&self) -> &str {
                "hanging"
            }

            async fn fetch(
                &self,
                _request: &TransferRequest,
            ) -> Result<FetchOutcome, BackendError> {
                std::future::pending().await
            }
        }

        let sink = Arc::new(MemorySink::default());
        let mut chain = BackendChain::default();
        chain.register(Box::new(HangingBackend));
        let engine = RelayEngine::new(
            chain,
            sink.clone(),
            RelayConfig {
                deadline: Duration::from_millis(100),
                ..RelayConfig::default()
            },
        );

        let mut feed = engine.start(request(), CancellationToken::new());
        let updates = drain(&mut feed).await;

        assert_eq!(updates.len(), 1);
        assert!(matches!(
            &updates[0],
            StatusUpdate::Cancelled {
                cause: CancelCause::Deadline,
                snapshot,
                ..
            } if snapshot.completed == 0
        ));
        assert_eq!(sink.calls(), 0);
    }

    #[tokio::test]
    async fn test_relay_caller_cancel_during_resolution() {
        struct BlockedBackend;

        #[async_trait]
        impl Backend for BlockedBackend {
            fn name(&self) -> &str {
                "blocked"
            }

            async fn fetch(
                &self,
                _request: &TransferRequest,
            ) -> Result<FetchOutcome, BackendError> {
                std::future::pending().await
            }
        }

        let sink = Arc::new(MemorySink::default());
        let mut chain = BackendChain::default();
        chain.register(Box::new(BlockedBackend));
        let engine = RelayEngine::new(chain, sink, RelayConfig::default());

        let caller = CancellationToken::new();
        let mut feed = engine.start(request(), caller.clone());
        caller.cancel();

        let updates = drain(&mut feed).await;
        assert!(matches!(
            updates.last().unwrap(),
            StatusUpdate::Cancelled {
                cause: CancelCause::Caller,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_relay_feed_closes_after_terminal() {
        let sink = Arc::new(MemorySink::default());
        let engine = engine_with(Box::new(StubBackend::ok(vec![b"ab"], Some(2))), sink);

        let mut feed = engine.start(request(), CancellationToken::new());
        let mut saw_terminal = false;
        while let Some(update) = feed.recv().await {
            assert!(!saw_terminal, "no updates may follow the terminal");
            saw_terminal = update.is_terminal();
        }
        assert!(saw_terminal);
    }
}
