//! Single-flight and interval gating for background checkers.
//!
//! The running flag and the completion timestamp live under one mutex so two
//! callers racing past the interval check cannot both start a run.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct GateState {
    running: bool,
    last_finished: Option<Instant>,
}

/// Guards a periodically running check: at most one run in flight, and no
/// new run before `min_interval` has elapsed since the last completion.
pub struct CheckGate {
    state: Mutex<GateState>,
}

impl CheckGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
        }
    }

    /// Claim the gate. Returns `None` while a run is in flight or the
    /// interval has not yet elapsed. Dropping the permit releases the gate;
    /// call [`CheckPermit::complete`] to also record the completion time.
    pub fn try_begin(&self, min_interval: Duration) -> Option<CheckPermit<'_>> {
        let mut state = self.state.lock().expect("gate lock poisoned");
        if state.running {
            return None;
        }
        if let Some(finished) = state.last_finished {
            if finished.elapsed() < min_interval {
                return None;
            }
        }
        state.running = true;
        Some(CheckPermit {
            gate: self,
            completed: false,
        })
    }

    fn release(&self, completed: bool) {
        let mut state = self.state.lock().expect("gate lock poisoned");
        state.running = false;
        if completed {
            state.last_finished = Some(Instant::now());
        }
    }
}

impl Default for CheckGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive permission to run one check.
pub struct CheckPermit<'a> {
    gate: &'a CheckGate,
    completed: bool,
}

impl CheckPermit<'_> {
    /// Mark the run as completed, starting the interval window.
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for CheckPermit<'_> {
    fn drop(&mut self) {
        self.gate.release(self.completed);
    }
}
