//! Backend candidates that turn a source URL into a byte stream.
//!
//! A backend candidate is one pluggable resolver behind the [`Backend`]
//! contract. Candidates are queried in order by the
//! [`BackendChain`](chain::BackendChain) until one accepts; "not my URL" is
//! an explicit [`FetchOutcome::Declined`] rather than an error.
//!
//! # Architecture
//!
//! - [`Backend`] - Async trait that individual candidates implement
//! - [`FetchOutcome`] - Tagged accept/decline outcome of one attempt
//! - [`SourceResponse`] - Resolved byte stream with status/headers/final URL
//! - [`chain::BackendChain`] - Ordered fallback chain with first-match-wins loop
//! - [`DebridLinkBackend`] - debrid-link.com unrestrictor
//! - [`RealDebridBackend`] - real-debrid.com unrestrictor with cached hoster set
//! - [`RcloneBackend`] - local rclone helper (remote download / cat fallback)

pub mod chain;
mod debrid_link;
mod error;
mod hosters;
mod real_debrid;
mod rclone;

pub use chain::{BackendChain, FailurePolicy, ResolveError};
pub use debrid_link::DebridLinkBackend;
pub use error::BackendError;
pub use hosters::HosterCache;
pub use real_debrid::RealDebridBackend;
pub use rclone::RcloneBackend;

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tracing::warn;
use url::Url;

use crate::config::BackendConfig;
use crate::transfer::TransferRequest;

/// The byte stream flowing from a resolved source to the sink.
///
/// Chunk errors are surfaced as `io::Error` so the same stream type feeds
/// both file sinks and `reqwest::Body::wrap_stream`.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A resolved source: response metadata plus the body stream.
///
/// The final URL is the one the provider actually served (after unrestriction
/// and redirects); the transfer's target name is derived from its path.
pub struct SourceResponse {
    /// HTTP status the source answered with.
    pub status: StatusCode,
    /// Final URL after the provider resolved/redirected the source.
    pub final_url: Url,
    /// Declared body length, when the source provides one.
    pub content_length: Option<u64>,
    /// Declared content type, when the source provides one.
    pub content_type: Option<String>,
    /// The body stream. Not buffered; consumed exactly once.
    pub body: ByteStream,
}

impl SourceResponse {
    /// Wraps an HTTP response into a source, boxing its body stream.
    pub fn from_http(response: reqwest::Response) -> Self {
        let status = response.status();
        let final_url = response.url().clone();
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes_stream().map_err(io::Error::other).boxed();
        Self {
            status,
            final_url,
            content_length,
            content_type,
            body,
        }
    }

    /// Builds a source from raw parts.
    ///
    /// Keeps pipeline construction testable without a live HTTP response.
    pub fn from_parts(
        status: StatusCode,
        final_url: Url,
        content_length: Option<u64>,
        content_type: Option<&str>,
        body: ByteStream,
    ) -> Self {
        Self {
            status,
            final_url,
            content_length,
            content_type: content_type.map(str::to_string),
            body,
        }
    }

    /// Returns true when the declared content type marks an unusable payload
    /// (an HTML page served where file bytes were expected).
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html"))
    }
}

impl std::fmt::Debug for SourceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResponse")
            .field("status", &self.status)
            .field("final_url", &self.final_url.as_str())
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single backend candidate's attempt.
///
/// `Failed` is the `Err` arm of [`Backend::fetch`]; keeping decline out of the
/// error channel means the chain's branching is type-checked instead of keyed
/// on a magic HTTP status.
pub enum FetchOutcome {
    /// The candidate serviced the URL; here is the stream.
    Accepted(SourceResponse),
    /// The candidate recognizes it cannot service this URL.
    Declined {
        /// Why the candidate declined (host not in its supported set, etc.)
        reason: String,
    },
}

impl FetchOutcome {
    /// Creates a decline outcome.
    pub fn declined(reason: impl Into<String>) -> Self {
        Self::Declined {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted(response) => f.debug_tuple("Accepted").field(response).finish(),
            Self::Declined { reason } => {
                f.debug_struct("Declined").field("reason", reason).finish()
            }
        }
    }
}

/// Trait that all backend candidates implement.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn Backend>`. Rust 2024 native async traits are not object-safe, so
/// `async_trait` is required for the chain pattern.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the candidate's name (e.g. "debrid-link", "rclone-cat").
    fn name(&self) -> &str;

    /// Attempts to turn the request's source URL into a byte stream.
    ///
    /// A candidate may rewrite the URL it forwards upstream (e.g. stripping
    /// the password parameter); the request itself is never mutated.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the candidate attempted service and
    /// failed; declining is not an error.
    async fn fetch(&self, request: &TransferRequest) -> Result<FetchOutcome, BackendError>;
}

/// Builds the reference fallback chain from caller-supplied configuration.
///
/// Order is significant and part of the observable contract: debrid-link,
/// real-debrid, rclone remote download, rclone cat. Candidates without
/// configuration are skipped with a warning, mirroring how optional
/// resolvers degrade rather than fail the whole chain.
#[must_use]
pub fn build_default_backend_chain(config: &BackendConfig) -> BackendChain {
    let mut chain = BackendChain::new(config.failure_policy);

    match &config.debrid_link_api_key {
        Some(key) => chain.register(Box::new(DebridLinkBackend::new(key.clone()))),
        None => warn!("debrid-link API key absent; candidate skipped"),
    }

    match &config.real_debrid_api_key {
        Some(key) => chain.register(Box::new(RealDebridBackend::new(key.clone()))),
        None => warn!("real-debrid API key absent; candidate skipped"),
    }

    match &config.rclone_remote {
        Some(remote) => chain.register(Box::new(RcloneBackend::remote_download(
            config.rclone_binary.clone(),
            remote.clone(),
        ))),
        None => warn!("rclone remote absent; remote-download candidate skipped"),
    }

    // Terminal fallback: direct fetch through rclone, password stripped.
    chain.register(Box::new(RcloneBackend::cat(config.rclone_binary.clone())));

    chain
}
