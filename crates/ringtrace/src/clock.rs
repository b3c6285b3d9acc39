//! Wall-clock abstraction.
//!
//! Rotation boundaries, retention cutoffs, stat timestamps and span timing all
//! read time through a [`Clock`] so tests can drive them with [`ManualClock`].

use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Local wall-clock time, used for file naming and rotation.
    fn now(&self) -> NaiveDateTime;

    /// Milliseconds since the Unix epoch, used for span timestamps.
    fn now_millis(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A settable clock for tests.
///
/// `now_millis` is derived from `now` treated as UTC, so both views always
/// advance together.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the given Unix millisecond timestamp.
    pub fn from_millis(millis: i64) -> Self {
        let start = DateTime::from_timestamp_millis(millis)
            .unwrap_or_default()
            .naive_utc();
        Self::new(start)
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }

    fn now_millis(&self) -> u64 {
        self.now.lock().and_utc().timestamp_millis().max(0) as u64
    }
}
