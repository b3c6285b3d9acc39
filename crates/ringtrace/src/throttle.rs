//! Log Throttling
//!
//! Warnings raised on the hot path (discarded events, failing writes) must not
//! amplify an overload by logging once per event. A [`Throttle`] decides
//! whether a given occurrence may be logged and reports how many occurrences
//! were suppressed since the last one that was.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Trait for pacing repeated diagnostics.
///
/// Implementors must be cheap to call from many threads at once.
pub trait Throttle: Send + Sync {
    /// Record an occurrence. Returns `Some(suppressed)` when this occurrence
    /// may be logged, where `suppressed` counts the occurrences swallowed
    /// since the previous permitted one.
    fn try_acquire(&self) -> Option<u64>;
}

/// Interval-based throttle: at most one permitted occurrence per period.
///
/// # Example
///
/// ```
/// use ringtrace::throttle::{IntervalThrottle, Throttle};
/// use std::time::Duration;
///
/// let throttle = IntervalThrottle::new(Duration::from_secs(10));
/// assert_eq!(throttle.try_acquire(), Some(0));
/// assert_eq!(throttle.try_acquire(), None);
/// ```
#[derive(Debug)]
pub struct IntervalThrottle {
    period: Duration,
    last: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl IntervalThrottle {
    /// Create a throttle with a fixed period between permitted occurrences.
    ///
    /// A zero period permits everything.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }
}

impl Throttle for IntervalThrottle {
    fn try_acquire(&self) -> Option<u64> {
        if self.period.is_zero() {
            return Some(0);
        }

        let now = Instant::now();
        let mut last = self.last.lock();
        let permitted = match *last {
            Some(at) => now.duration_since(at) >= self.period,
            None => true,
        };

        if permitted {
            *last = Some(now);
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_interval_throttle_counts_suppressed() {
        let throttle = IntervalThrottle::new(Duration::from_millis(30));

        assert_eq!(throttle.try_acquire(), Some(0));
        for _ in 0..5 {
            assert_eq!(throttle.try_acquire(), None);
        }

        thread::sleep(Duration::from_millis(40));
        assert_eq!(throttle.try_acquire(), Some(5));
        assert_eq!(throttle.try_acquire(), None);
    }

    #[test]
    fn test_zero_period_permits_everything() {
        let throttle = IntervalThrottle::new(Duration::ZERO);
        for _ in 0..100 {
            assert_eq!(throttle.try_acquire(), Some(0));
        }
    }
}
