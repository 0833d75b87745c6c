//! Change-tracking clock

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Source of millisecond watermarks
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock that never repeats or goes backwards.
///
/// Every reading is strictly greater than the previous one, so a write
/// stamped after a checkpoint is always newer than the checkpoint.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let wall = Utc::now().timestamp_millis().max(0) as u64;
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        wall.max(previous + 1)
    }
}

/// Clock set by hand, for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_strictly_increases() {
        let clock = SystemClock::new();
        let mut previous = clock.now_ms();
        for _ in 0..1000 {
            let next = clock.now_ms();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 105);
        clock.set(7);
        assert_eq!(clock.now_ms(), 7);
    }
}
