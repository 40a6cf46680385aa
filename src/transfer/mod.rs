//! The resolving transfer pipeline: request model, progress monitoring,
//! cancellation, and the relay engine.
//!
//! One transfer is one instance of the pipeline: a [`TransferRequest`] is
//! resolved through the backend chain, the resulting stream is relayed to a
//! sink with a [`progress`] monitor and a [`cancel`] gate attached, and the
//! caller consumes a live [`status`] feed. No state is shared between
//! concurrent transfers.

pub mod cancel;
mod error;
pub mod progress;
pub mod relay;
pub mod status;

pub use cancel::{CancelCause, CancellationGate};
pub use error::TransferError;
pub use progress::{ProgressHandle, ProgressSnapshot};
pub use relay::{RelayEngine, StatusFeed};
pub use status::StatusUpdate;

use url::Url;

/// Immutable input for one fetch operation.
///
/// Created once per inbound fetch command, consumed by the backend chain,
/// never mutated after creation.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    source: Url,
    password: Option<String>,
}

impl TransferRequest {
    /// Parses the source URL and builds a request.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidSource`] when the URL does not parse;
    /// the transfer never starts in that case.
    pub fn new(source: &str, password: Option<String>) -> Result<Self, TransferError> {
        let source = Url::parse(source).map_err(|_| TransferError::InvalidSource {
            input: source.to_string(),
        })?;
        Ok(Self { source, password })
    }

    /// The source URL to resolve.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Optional password, forwarded to backends that require it.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The source URL with any `password` query parameter removed.
    ///
    /// Candidates that hand the URL to collaborators unaware of passwords
    /// (the rclone cat fallback) forward this rewritten form.
    #[must_use]
    pub fn source_without_password(&self) -> Url {
        let mut url = self.source.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| name != "password")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        url
    }
}

/// Derives the sink target name from the resolved response's final URL.
///
/// The last path segment is taken and percent-decoded. When the path carries
/// no usable segment, a name is derived from the host so the sink always
/// receives something writable. Uniqueness across concurrent transfers is
/// the sink's concern.
#[must_use]
pub fn target_name(final_url: &Url) -> String {
    let segment = final_url
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .unwrap_or_default();

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);

    if !decoded.is_empty() {
        return decoded;
    }

    final_url
        .host_str()
        .map_or_else(|| "download".to_string(), |host| host.replace('.', "-"))
}
