//! Owned configuration for the pipeline.
//!
//! Plain structs populated by the caller. Reading the environment or CLI
//! arguments belongs to the hosting process, not this crate.

use std::time::Duration;

use crate::backend::FailurePolicy;

/// The external interaction window the deadline defaults to (Discord allows
/// 15 minutes per interaction).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// Default bound on snapshot emission cadence.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);

/// Default status feed channel capacity.
pub const DEFAULT_STATUS_CAPACITY: usize = 32;

/// Per-transfer relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Hard deadline for one transfer; the gate's timer source.
    pub deadline: Duration,
    /// Minimum interval between progress snapshots.
    pub snapshot_interval: Duration,
    /// Bounded capacity of the status feed channel; snapshots beyond it are
    /// dropped rather than stalling the byte path.
    pub status_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            status_capacity: DEFAULT_STATUS_CAPACITY,
        }
    }
}

/// Configuration for the default backend chain.
///
/// Candidates whose fields are absent are skipped at chain construction.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Bearer key for the debrid-link.com API.
    pub debrid_link_api_key: Option<String>,
    /// Bearer key for the real-debrid.com API.
    pub real_debrid_api_key: Option<String>,
    /// Rclone remote for the host-specific download candidate (e.g.
    /// `:fshare:`).
    pub rclone_remote: Option<String>,
    /// Rclone binary to invoke; `None` means `rclone` on the PATH.
    pub rclone_binary: Option<String>,
    /// What the chain does when a candidate fails rather than declines.
    pub failure_policy: FailurePolicy,
}
