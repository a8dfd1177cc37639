//! Cooperative stop coordinator
//!
//! Bounds the total number of completed iterations across all sessions and
//! carries the process-wide stop signal. Cancellation is cooperative: loops
//! check the flag between polls, nothing interrupts an in-flight request, so
//! a stop signal never truncates a call already sent to the server.
//!
//! `stop_called` is deliberately separate from `should_stop`: the first tells
//! consumers that shutdown has already been acted upon, preventing duplicate
//! shutdown actions once the threshold is crossed.

use std::sync::Mutex;

#[derive(Debug, Default)]
struct StopState {
    completed_iterations: u64,
    max_iterations: u64,
    should_stop: bool,
    stop_called: bool,
}

/// Shared iteration-budget tracker and stop signal
#[derive(Debug, Default)]
pub struct StopCoordinator {
    state: Mutex<StopState>,
}

impl StopCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator with the iteration budget already set
    pub fn with_max_iterations(max: u64) -> Self {
        let coordinator = Self::new();
        coordinator.set_max_iterations(max);
        coordinator
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StopState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Set the total completed-iteration budget
    pub fn set_max_iterations(&self, max: u64) {
        let mut state = self.lock();
        state.max_iterations = max;
    }

    /// Record one completed iteration
    ///
    /// Returns the new value of `should_stop`; once the threshold is reached
    /// the flag latches until process exit.
    pub fn increment_iteration(&self) -> bool {
        let mut state = self.lock();
        state.completed_iterations += 1;
        if state.max_iterations > 0 && state.completed_iterations >= state.max_iterations {
            state.should_stop = true;
        }
        state.should_stop
    }

    /// Whether the iteration budget has been exhausted
    pub fn should_stop(&self) -> bool {
        self.lock().should_stop
    }

    /// Mark that a consumer has acted on the stop signal
    pub fn set_stop_called(&self) {
        let mut state = self.lock();
        state.stop_called = true;
    }

    /// Atomically claim the stop announcement
    ///
    /// Returns `true` for exactly one caller; concurrent crossers of the
    /// iteration threshold race for it under the same mutex, so duplicate
    /// shutdown actions cannot happen.
    pub fn try_set_stop_called(&self) -> bool {
        let mut state = self.lock();
        if state.stop_called {
            false
        } else {
            state.stop_called = true;
            true
        }
    }

    /// Whether shutdown has already been acted upon
    pub fn is_stop_called(&self) -> bool {
        self.lock().stop_called
    }

    /// Iterations completed so far across all sessions
    pub fn completed_iterations(&self) -> u64 {
        self.lock().completed_iterations
    }
}
