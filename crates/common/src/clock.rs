//! Clock abstraction for wall-clock decisions.
//!
//! Staleness and retention are judged against "now". Reading it through
//! [`Clock`] keeps those decisions reproducible in tests.

use chrono::{DateTime, Duration, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a known instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    /// A copy of this clock moved forward (or back) by `delta`.
    pub fn advanced(&self, delta: Duration) -> Self {
        Self {
            instant: self.instant + delta,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}

/// Age of `instant` relative to `now`, clamped at zero for future instants.
pub fn age_of(instant: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let age = now - instant;
    if age < Duration::zero() {
        Duration::zero()
    } else {
        age
    }
}
