//! Source of "today" for day-keyed writes and rotation checks.

use parking_lot::Mutex;

use crate::types::DayKey;

/// Supplies the current local day.
pub trait Clock: Send + Sync {
    /// Returns the current day.
    fn today(&self) -> DayKey;
}

/// Clock backed by the local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> DayKey {
        DayKey::today()
    }
}

/// Clock whose day is set by hand, for driving rotation in tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<DayKey>,
}

impl ManualClock {
    /// Creates a clock fixed at `day`.
    #[must_use]
    pub const fn new(day: DayKey) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    /// Moves the clock to `day`.
    pub fn set(&self, day: DayKey) {
        *self.day.lock() = day;
    }

    /// Moves the clock forward by one day.
    pub fn advance(&self) {
        let mut day = self.day.lock();
        if let Some(next) = day.succ() {
            *day = next;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> DayKey {
        *self.day.lock()
    }
}
