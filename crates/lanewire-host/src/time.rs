use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Abstraction over a time source to improve testability.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: Instant) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, by: Duration) -> Instant {
        let mut now = self.now.lock();
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_only_on_request() {
        let start = Instant::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.advance(Duration::from_millis(15)), start + Duration::from_millis(15));
        assert_eq!(clock.now(), start + Duration::from_millis(15));
    }
}
