//! Error taxonomy for one transfer.
//!
//! Every failure is recovered into a terminal status-feed message; nothing
//! here is allowed to crash the hosting process. Resolution failures
//! short-circuit before any bytes reach the sink, and no failure triggers an
//! automatic retry of the pipeline.

use thiserror::Error;

use crate::backend::ResolveError;
use crate::sink::SinkError;

/// Failure outcomes of a transfer.
///
/// Cancellation is not a failure in this sense; it is reported on the status
/// feed as its own terminal update, carrying the gate's cause.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The supplied URL does not parse. Surfaced immediately; the transfer
    /// never starts.
    #[error("invalid source URL: {input}")]
    InvalidSource {
        /// The unparsable input.
        input: String,
    },

    /// Resolution failed: exhausted chain, unsupported payload, or a fatal
    /// candidate failure.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The source yielded a non-success status after resolution accepted it.
    /// Defensive: the chain's checks normally prevent this.
    #[error("resolved source answered HTTP {status}")]
    UpstreamStatus {
        /// The unexpected status code.
        status: u16,
    },

    /// The write to the storage target failed. Fatal for this transfer,
    /// reported, never retried.
    #[error(transparent)]
    Sink(#[from] SinkError),
}
