//! Status feed vocabulary and text rendering.
//!
//! The feed carries [`StatusUpdate`]s: periodic progress snapshots while
//! bytes flow, then exactly one terminal update (done, cancelled, or failed).
//! Rendering follows the rclone-style transfer report the original surface
//! prints, with sizes and durations in coarse human units only.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, HumanDuration};

use super::cancel::CancelCause;
use super::progress::ProgressSnapshot;

/// One entry on a transfer's status feed.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// A progress snapshot; terminal when `snapshot.done` is set.
    Progress {
        /// Sink target name the transfer reports under.
        target: Arc<str>,
        /// The snapshot.
        snapshot: ProgressSnapshot,
    },
    /// The cancellation gate fired. Always terminal, distinct from done.
    Cancelled {
        /// Sink target name the transfer reports under.
        target: Arc<str>,
        /// Which gate source fired.
        cause: CancelCause,
        /// Progress at the moment the relay stopped.
        snapshot: ProgressSnapshot,
    },
    /// Resolution or relay failed. Always terminal.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl StatusUpdate {
    /// True when no further updates follow on this feed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Progress { snapshot, .. } => snapshot.done,
            Self::Cancelled { .. } | Self::Failed { .. } => true,
        }
    }

    /// Renders the update as the caller-facing text block.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Progress { target, snapshot } => render_progress(target, snapshot),
            Self::Cancelled {
                target,
                cause,
                snapshot,
            } => format!(
                "**Cancelled** ({cause}): {target}, transferred {} in {}",
                HumanBytes(snapshot.completed),
                coarse(snapshot.elapsed),
            ),
            Self::Failed { message } => format!("**Error**: {message}"),
        }
    }
}

fn render_progress(target: &str, snapshot: &ProgressSnapshot) -> String {
    let total = snapshot
        .total
        .map_or_else(|| "-".to_string(), |t| HumanBytes(t).to_string());
    let percent = snapshot
        .percent
        .map_or_else(|| "-".to_string(), |p| format!("{p}%"));
    let rate = HumanBytes(snapshot.rate);

    let mut message = format!(
        "Transferred:    {} / {total}, {percent}, {rate}/s",
        HumanBytes(snapshot.completed),
    );
    if let Some(eta) = snapshot.eta.filter(|_| !snapshot.done) {
        message.push_str(&format!(", ETA {}", coarse(eta)));
    }
    message.push_str(&format!("\nElapsed time:   {}", coarse(snapshot.elapsed)));
    message.push_str("\nTransferring:");
    message.push_str(&format!("\n* {target}: {percent} /{total}, {rate}/s"));
    if let Some(eta) = snapshot.eta.filter(|_| !snapshot.done) {
        message.push_str(&format!(", {}", coarse(eta)));
    }
    message
}

/// Renders a duration to the nearest whole second; sub-second noise is
/// suppressed in the report.
fn coarse(duration: Duration) -> HumanDuration {
    HumanDuration(Duration::from_secs(duration.as_secs()))
}
