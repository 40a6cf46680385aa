//! Debrid Relay Library
//!
//! This library resolves hoster URLs through an ordered chain of backend
//! candidates (debrid providers, rclone helpers), relays the resolved byte
//! stream into a storage sink, and reports live transfer status on a
//! decoupled feed. Transfers run under a cancellation gate combining a
//! deadline with a caller-held token.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`backend`] - Backend candidates and the ordered fallback chain
//! - [`transfer`] - Relay engine, progress accounting, cancellation, status feed
//! - [`sink`] - Storage sinks consuming the relayed byte stream
//! - [`config`] - Caller-supplied configuration for chain and relay
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use debrid_relay::{
//!     BackendConfig, FsSink, RelayConfig, RelayEngine, TransferRequest,
//!     build_default_backend_chain,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let chain = build_default_backend_chain(&BackendConfig::default());
//! let sink = Arc::new(FsSink::new("/var/downloads"));
//! let engine = RelayEngine::new(chain, sink, RelayConfig::default());
//!
//! let request = TransferRequest::new("https://rapidgator.net/file/abc/archive.rar", None)?;
//! let mut feed = engine.start(request, CancellationToken::new());
//! while let Some(update) = feed.recv().await {
//!     println!("{}", update.render());
//!     if update.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod sink;
pub mod transfer;

// Re-export commonly used types
pub use backend::{
    Backend, BackendChain, BackendError, ByteStream, DebridLinkBackend, FailurePolicy,
    FetchOutcome, HosterCache, RcloneBackend, RealDebridBackend, ResolveError, SourceResponse,
    build_default_backend_chain,
};
pub use config::{BackendConfig, RelayConfig};
pub use sink::{FsSink, HttpPutSink, Sink, SinkError};
pub use transfer::{
    CancelCause, CancellationGate, ProgressHandle, ProgressSnapshot, RelayEngine, StatusFeed,
    StatusUpdate, TransferError, TransferRequest, target_name,
};
