//! Ordered fallback chain over backend candidates.
//!
//! The [`BackendChain`] tries candidates strictly in registration order and
//! short-circuits on the first accept. Earlier candidates are preferred; the
//! order is part of the observable contract.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transfer::TransferRequest;

use super::{Backend, BackendError, FetchOutcome, SourceResponse};

/// What the chain does when a candidate fails (as opposed to declining).
///
/// The reference behavior is [`FailurePolicy::ContinueOnUnsupported`]: only
/// the distinguished unsupported-input failure class falls through to the
/// next candidate; authentication errors, rate limits and network failures
/// abort resolution immediately. The other variants make the looser and
/// stricter interpretations available explicitly instead of being an
/// undocumented side effect of status-code handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fall through only on [`BackendError::UnsupportedInput`]; abort on
    /// anything else. Reference behavior.
    #[default]
    ContinueOnUnsupported,
    /// Fall through on every candidate failure.
    ContinueOnAnyFailure,
    /// Abort resolution on the first candidate failure of any class.
    AbortOnAnyFailure,
}

impl FailurePolicy {
    /// Returns true when resolution should continue past the given failure.
    #[must_use]
    pub fn continues_after(self, error: &BackendError) -> bool {
        match self {
            Self::ContinueOnUnsupported => error.is_unsupported_input(),
            Self::ContinueOnAnyFailure => true,
            Self::AbortOnAnyFailure => false,
        }
    }
}

/// Errors terminating a resolution attempt.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Every candidate declined (or fell through); nothing accepted the URL.
    #[error("no backend accepted the URL after trying {tried} candidate(s)")]
    AllBackendsExhausted {
        /// How many candidates were invoked.
        tried: usize,
    },

    /// A candidate accepted, but the payload is unusable (e.g. an HTML error
    /// page served with a success status).
    #[error("resolved source returned unsupported content type {content_type}")]
    UnsupportedContent {
        /// The offending content type.
        content_type: String,
    },

    /// A candidate attempted service and failed in a way the configured
    /// [`FailurePolicy`] treats as fatal.
    #[error("backend failure: {0}")]
    Upstream(#[from] BackendError),
}

/// An ordered collection of backend candidates with the resolution loop.
pub struct BackendChain {
    backends: Vec<Box<dyn Backend>>,
    policy: FailurePolicy,
}

impl BackendChain {
    /// Creates an empty chain with the given failure policy.
    #[must_use]
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            backends: Vec::new(),
            policy,
        }
    }

    /// Appends a candidate to the end of the chain.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        debug!(name = backend.name(), "registering backend candidate");
        self.backends.push(backend);
    }

    /// Returns the number of registered candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no candidates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Returns the configured failure policy.
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Resolves the request to a source stream through the fallback loop.
    ///
    /// Candidates are invoked one at a time, in order; the first accept wins
    /// and no later candidate is invoked. Declines fall through. Failures
    /// consult the [`FailurePolicy`].
    ///
    /// After the chain accepts, the payload is checked once: an HTML content
    /// type is a resolution failure even though the candidate reported
    /// success, since hosters commonly serve error pages with status 200.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::AllBackendsExhausted`] when the list runs out,
    /// [`ResolveError::UnsupportedContent`] on the post-chain payload check,
    /// and [`ResolveError::Upstream`] for fatal candidate failures.
    #[tracing::instrument(skip(self, request), fields(source = %request.source()))]
    pub async fn resolve(
        &self,
        request: &TransferRequest,
    ) -> Result<SourceResponse, ResolveError> {
        let mut tried: usize = 0;

        for backend in &self.backends {
            tried += 1;
            debug!(backend = backend.name(), "trying backend candidate");

            match backend.fetch(request).await {
                Ok(FetchOutcome::Accepted(response)) => {
                    info!(
                        backend = backend.name(),
                        status = response.status.as_u16(),
                        final_url = %response.final_url,
                        "backend accepted"
                    );
                    return check_payload(response);
                }
                Ok(FetchOutcome::Declined { reason }) => {
                    debug!(
                        backend = backend.name(),
                        reason, "backend declined, trying next"
                    );
                }
                Err(error) if self.policy.continues_after(&error) => {
                    warn!(
                        backend = backend.name(),
                        error = %error,
                        "backend failed, policy continues to next"
                    );
                }
                Err(error) => {
                    warn!(backend = backend.name(), error = %error, "backend failed, aborting");
                    return Err(ResolveError::Upstream(error));
                }
            }
        }

        Err(ResolveError::AllBackendsExhausted { tried })
    }
}

/// Post-resolution payload check, applied once after the chain completes.
fn check_payload(response: SourceResponse) -> Result<SourceResponse, ResolveError> {
    if response.is_html() {
        let content_type = response
            .content_type
            .clone()
            .unwrap_or_else(|| "text/html".to_string());
        warn!(content_type, "accepted source served an HTML payload");
        return Err(ResolveError::UnsupportedContent { content_type });
    }
    Ok(response)
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendChain")
            .field("backends", &names)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for BackendChain {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}
