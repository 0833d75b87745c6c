//! Elapsed-time measurement for execution hooks

use std::time::Instant;

/// Measures wall-clock time from creation
#[derive(Debug, Clone, Copy)]
pub struct ObservationTimer {
    started: Instant,
}

impl ObservationTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Milliseconds elapsed since `start`
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for ObservationTimer {
    fn default() -> Self {
        Self::start()
    }
}
