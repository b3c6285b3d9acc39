use std::hint;
use std::thread;
use std::time::Duration;

/// Adaptive backoff used by blocked producers and idle consumers.
///
/// Progresses spin with PAUSE → yield to OS → bounded sleeps. Unlike a pure
/// spin backoff it never "gives up": callers that wait for a slot or for data
/// keep calling [`Backoff::wait`] and end up parked in short sleeps, which
/// keeps an idle consumer pool cheap.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    max_sleep: Duration,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6; // 2^6 = 64 spins max before yielding
    const YIELD_LIMIT: u32 = 10;
    const MIN_SLEEP: Duration = Duration::from_micros(50);

    /// Creates a new backoff whose sleeping phase is capped at `max_sleep`.
    #[inline]
    pub fn new(max_sleep: Duration) -> Self {
        Self { step: 0, max_sleep }
    }

    /// Light spin with PAUSE hints.
    #[inline]
    pub fn spin(&mut self) {
        let spins = 1 << self.step.min(Self::SPIN_LIMIT);
        for _ in 0..spins {
            hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// Spin, then yield, then sleep with a doubling duration capped at
    /// `max_sleep`.
    #[inline]
    pub fn wait(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            self.spin();
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
            self.step += 1;
        } else {
            let exp = (self.step - Self::YIELD_LIMIT).min(16);
            let sleep = (Self::MIN_SLEEP * (1 << exp)).min(self.max_sleep);
            thread::sleep(sleep);
            self.step = self.step.saturating_add(1);
        }
    }

    /// True once the spin and yield phases are exhausted.
    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    /// Reset for next wait cycle.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_backoff_progression() {
        let mut b = Backoff::default();
        assert_eq!(b.step, 0);

        b.spin();
        assert!(b.step > 0);

        while !b.is_sleeping() {
            b.wait();
        }
        assert!(b.step > Backoff::YIELD_LIMIT);

        b.reset();
        assert_eq!(b.step, 0);
    }

    #[test]
    fn test_sleep_phase_is_capped() {
        let mut b = Backoff::new(Duration::from_millis(2));
        while !b.is_sleeping() {
            b.wait();
        }
        // Drive deep into the sleeping phase; every wait must stay bounded.
        for _ in 0..20 {
            b.wait();
        }
        let start = Instant::now();
        b.wait();
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
