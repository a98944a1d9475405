//! Pipeline clock.
//!
//! Frame timestamps and the mediator's "last update" time must come from the
//! same clock, otherwise the stale-frame rule compares unrelated numbers.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Source of pipeline time in nanoseconds.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Nanoseconds elapsed since construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Clock starting at zero now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for simulations and tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    /// Clock frozen at `start_ns`.
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_ns)),
        }
    }

    /// Jump to `ns`.
    pub fn set(&self, ns: u64) {
        *self.now.lock() = ns;
    }

    /// Move time forward and return the new value.
    pub fn advance(&self, delta_ns: u64) -> u64 {
        let mut now = self.now.lock();
        *now = now.saturating_add(delta_ns);
        *now
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        assert_eq!(other.advance(5), 15);
        assert_eq!(clock.now_ns(), 15);
        clock.set(3);
        assert_eq!(other.now_ns(), 3);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
