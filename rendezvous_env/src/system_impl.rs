//! Production implementation of RunContext using the system clocks.

use crate::RunContext;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by the OS clocks.
///
/// Monotonic time comes from `Instant`, wall-clock time from `SystemTime`.
pub struct SystemContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl SystemContext {
    /// Creates a new SystemContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across threads.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext for SystemContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}
