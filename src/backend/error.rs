//! Error types for backend candidates.
//!
//! A backend that *attempted* to service a URL and hit a problem returns one
//! of these; "this is not my URL" is not an error but a
//! [`FetchOutcome::Declined`](super::FetchOutcome).

use thiserror::Error;

/// Errors produced by a single backend candidate while servicing a request.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network-level error talking to the provider (DNS, connect, TLS, body).
    #[error("network error in backend {backend}: {source}")]
    Network {
        /// Name of the backend that failed.
        backend: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The provider API answered with a non-success HTTP status.
    #[error("backend {backend} returned HTTP {status}")]
    Status {
        /// Name of the backend that failed.
        backend: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The provider API reported a structured error of its own.
    #[error("backend {backend} API error: {message}")]
    Api {
        /// Name of the backend that failed.
        backend: String,
        /// Provider-supplied error message.
        message: String,
    },

    /// The candidate attempted service but the provider rejected the input
    /// itself (HTTP 400 class). Distinguished because the default chain
    /// policy falls through to the next candidate on this class only.
    #[error("backend {backend} does not support input: {input}")]
    UnsupportedInput {
        /// Name of the backend that failed.
        backend: String,
        /// The rejected input (source URL).
        input: String,
    },

    /// Failed to launch or talk to a helper process (rclone).
    #[error("backend {backend} failed to spawn helper: {source}")]
    Spawn {
        /// Name of the backend that failed.
        backend: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Creates a network error.
    pub fn network(backend: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            backend: backend.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn status(backend: impl Into<String>, status: u16) -> Self {
        Self::Status {
            backend: backend.into(),
            status,
        }
    }

    /// Creates a provider API error.
    pub fn api(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported-input error.
    pub fn unsupported_input(backend: impl Into<String>, input: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            backend: backend.into(),
            input: input.into(),
        }
    }

    /// Creates a helper-process spawn error.
    pub fn spawn(backend: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            backend: backend.into(),
            source,
        }
    }

    /// Returns true for the distinguished unsupported-input failure class.
    ///
    /// The chain's default [`FailurePolicy`](super::chain::FailurePolicy)
    /// continues past this class and treats every other failure as fatal.
    #[must_use]
    pub fn is_unsupported_input(&self) -> bool {
        matches!(self, Self::UnsupportedInput { .. })
    }

    /// Returns the name of the backend that produced the error.
    #[must_use]
    pub fn backend(&self) -> &str {
        match self {
            Self::Network { backend, .. }
            | Self::Status { backend, .. }
            | Self::Api { backend, .. }
            | Self::UnsupportedInput { backend, .. }
            | Self::Spawn { backend, .. } => backend,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_input_classification() {
        let err = BackendError::unsupported_input("debrid-link", "https://example.com/f");
        assert!(err.is_unsupported_input());

        let err = BackendError::status("debrid-link", 503);
        assert!(!err.is_unsupported_input());
    }

    #[test]
    fn test_status_display() {
        let err = BackendError::status("real-debrid", 429);
        let msg = err.to_string();
        assert!(msg.contains("real-debrid"), "Expected backend in: {msg}");
        assert!(msg.contains("429"), "Expected status in: {msg}");
    }

    #[test]
    fn test_api_display() {
        let err = BackendError::api("debrid-link", "freeServerOverload");
        let msg = err.to_string();
        assert!(msg.contains("freeServerOverload"), "Expected message in: {msg}");
    }

    #[test]
    fn test_backend_accessor() {
        let err = BackendError::spawn(
            "rclone",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no rclone"),
        );
        assert_eq!(err.backend(), "rclone");
    }
}
