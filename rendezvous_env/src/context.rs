//! Core environment context trait for Rendezvous runs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for time during a run.
///
/// The scheduler measures save and cleanup intervals with [`now`](Self::now)
/// and stamps checkpoints with [`system_time`](Self::system_time).
///
/// # Implementations
///
/// - **Production**: `SystemContext` - wraps `Instant` and `SystemTime`
/// - **Simulation**: `SimContext` - a manually advanced virtual clock
pub trait RunContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// Used for interval bookkeeping and elapsed-time reporting.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used to stamp checkpoints.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as whole seconds since the Unix epoch.
    fn unix_seconds(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
