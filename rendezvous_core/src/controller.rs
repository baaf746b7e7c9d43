//! Cooperative run control: pause/resume, cancellation and status reporting.
//!
//! The controller is a passive flag holder shared between the scheduler, its
//! workers and whatever external transport drives it (keystrokes, a signal
//! handler, an HTTP endpoint). Nothing in here blocks except
//! [`RunController::wait_while_paused`], which parks on a condition variable.

use crate::types::VehiclePair;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::info;

/// How long a paused thread sleeps between re-checks of the flags.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of a run as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Cancelling,
    Finished,
}

/// Snapshot of a run's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub points_processed: u64,
    pub points_total: u64,
    pub trips_processed: u64,
    pub trips_total: u64,
    pub pairs_found: usize,
    pub elapsed_seconds: f64,

    /// Full pair list, attached only after [`RunController::request_report`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairs: Option<Vec<VehiclePair>>,
}

impl RunStatus {
    /// Fraction of points processed, in `[0, 1]`.
    pub fn completion(&self) -> f64 {
        if self.points_total == 0 {
            0.0
        } else {
            self.points_processed as f64 / self.points_total as f64
        }
    }
}

/// Shared control surface for an in-progress run.
#[derive(Debug, Default)]
pub struct RunController {
    paused: Mutex<bool>,
    resumed: Condvar,
    cancelled: AtomicBool,
    report_requested: AtomicBool,
    status: Mutex<RunStatus>,
}

impl RunController {
    /// Creates a controller in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped controller for sharing with a transport.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Pauses the run at the next point or trajectory boundary.
    pub fn pause(&self) {
        *self.lock_paused() = true;
        self.update_state(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
            }
        });
        info!("Run paused");
    }

    /// Resumes a paused run.
    pub fn resume(&self) {
        *self.lock_paused() = false;
        self.resumed.notify_all();
        self.update_state(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
            }
        });
        info!("Run resumed");
    }

    /// Flips between paused and running. Returns the new paused flag.
    pub fn toggle_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            true
        }
    }

    /// Returns true if the run is paused.
    pub fn is_paused(&self) -> bool {
        *self.lock_paused()
    }

    /// Requests cancellation. Already discovered pairs are kept; the run
    /// flushes a final checkpoint and returns a partial result.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.resumed.notify_all();
        self.update_state(|state| {
            if *state != RunState::Finished {
                *state = RunState::Cancelling;
            }
        });
        info!("Cancellation requested");
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks while the run is paused.
    ///
    /// Returns `false` if the run was cancelled (before or during the pause),
    /// `true` if processing may continue.
    pub fn wait_while_paused(&self) -> bool {
        let mut paused = self.lock_paused();
        while *paused && !self.is_cancelled() {
            paused = self
                .resumed
                .wait_timeout(paused, PAUSE_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        !self.is_cancelled()
    }

    /// Asks the scheduler to attach the full pair list to the next status
    /// snapshot.
    pub fn request_report(&self) {
        self.report_requested.store(true, Ordering::SeqCst);
    }

    /// Returns the latest published status without touching run state.
    pub fn status(&self) -> RunStatus {
        self.lock_status().clone()
    }

    pub(crate) fn take_report_request(&self) -> bool {
        self.report_requested.swap(false, Ordering::SeqCst)
    }

    /// Replaces the published snapshot. The state field is derived from the
    /// control flags unless the run has finished.
    pub(crate) fn publish(&self, mut status: RunStatus) {
        if status.state != RunState::Finished {
            status.state = if self.is_cancelled() {
                RunState::Cancelling
            } else if self.is_paused() {
                RunState::Paused
            } else {
                RunState::Running
            };
        }
        *self.lock_status() = status;
    }

    fn update_state(&self, f: impl FnOnce(&mut RunState)) {
        f(&mut self.lock_status().state);
    }

    // Flags and snapshots stay meaningful even if a holder panicked.
    fn lock_paused(&self) -> std::sync::MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, RunStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_controller_starts_idle() {
        let controller = RunController::new();
        assert_eq!(controller.status().state, RunState::Idle);
        assert!(!controller.is_paused());
        assert!(!controller.is_cancelled());
        assert!(controller.wait_while_paused());
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let controller = RunController::shared();
        controller.pause();

        let waiter = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || {
                let started = Instant::now();
                let proceed = controller.wait_while_paused();
                (proceed, started.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        controller.resume();

        let (proceed, waited) = waiter.join().unwrap();
        assert!(proceed);
        assert!(waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_cancel_wakes_paused_waiters() {
        let controller = RunController::shared();
        controller.pause();

        let waiter = {
            let controller = Arc::clone(&controller);
            std::thread::spawn(move || controller.wait_while_paused())
        };

        std::thread::sleep(Duration::from_millis(20));
        controller.cancel();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_toggle_pause() {
        let controller = RunController::new();
        assert!(controller.toggle_pause());
        assert!(controller.is_paused());
        assert!(!controller.toggle_pause());
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_publish_derives_state_from_flags() {
        let controller = RunController::new();
        controller.publish(RunStatus {
            points_processed: 10,
            points_total: 40,
            ..RunStatus::default()
        });
        let status = controller.status();
        assert_eq!(status.state, RunState::Running);
        assert_eq!(status.completion(), 0.25);

        controller.pause();
        assert_eq!(controller.status().state, RunState::Paused);

        controller.cancel();
        controller.publish(controller.status());
        assert_eq!(controller.status().state, RunState::Cancelling);
    }

    #[test]
    fn test_report_request_is_consumed_once() {
        let controller = RunController::new();
        assert!(!controller.take_report_request());
        controller.request_report();
        assert!(controller.take_report_request());
        assert!(!controller.take_report_request());
    }
}
