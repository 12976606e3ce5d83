//! Store clocks.
//!
//! Every store stamps `CreatedOn`/`ModifiedOn` and session start times from
//! its own clock. Peers never trust the caller's clock.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Point in time on a store clock.
pub type Timestamp = DateTime<Utc>;

/// A source of store-local time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A deterministic clock for tests.
///
/// Each call to [`Clock::now`] returns the current reading and then moves the
/// clock forward by `step`, so consecutive readings are strictly increasing
/// unless `step` is zero.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
    step: Duration,
}

impl ManualClock {
    /// Creates a clock starting at `start` that advances one millisecond per reading.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
            step: Duration::milliseconds(1),
        }
    }

    /// Sets how far the clock moves on every reading.
    #[must_use]
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    /// Returns the current reading without advancing.
    pub fn peek(&self) -> Timestamp {
        *self.current.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut current = self.current.lock();
        let reading = *current;
        *current += self.step;
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_steps() {
        let clock = ManualClock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
        assert_eq!(b - a, Duration::milliseconds(1));
    }

    #[test]
    fn manual_clock_advance_and_peek() {
        let clock = ManualClock::default().with_step(Duration::zero());
        let start = clock.peek();
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now() - start, Duration::minutes(5));
        assert_eq!(clock.now(), clock.peek());
    }
}
