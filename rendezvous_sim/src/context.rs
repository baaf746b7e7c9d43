//! Simulation context implementing RunContext for deterministic testing.

use rendezvous_env::RunContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by a virtual clock.
///
/// Time only moves when the harness says so: explicitly through
/// [`advance_time`](Self::advance_time) / [`sleep`](Self::sleep), or by a
/// fixed step on every `now()` call when built with
/// [`with_step`](Self::with_step). The stepping mode lets a scenario make
/// checkpoint saves and evictions fire at every batch boundary without
/// touching the wall clock.
#[derive(Debug)]
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,

    /// Advance applied after each `now()` read (nanoseconds)
    step_ns: u64,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
            step_ns: 0,
            epoch: UNIX_EPOCH + Duration::from_secs(1372636800), // 2013-07-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Makes every clock read advance virtual time by `step`.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step_ns = step.as_nanos() as u64;
        self
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        self.virtual_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Simulated sleep: returns immediately after advancing virtual time.
    pub fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        self.virtual_time_ns.store(time_ns, Ordering::SeqCst);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }

    /// Master seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            step_ns: self.step_ns,
            epoch: self.epoch,
        }
    }
}

impl RunContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.virtual_time_ns.fetch_add(self.step_ns, Ordering::SeqCst))
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + Duration::from_nanos(self.time_ns())
    }
}
