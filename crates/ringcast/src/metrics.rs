use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for a ring buffer.
///
/// All counters use `Ordering::Relaxed`: they are statistical and guard no
/// other data.
#[derive(Debug, Default)]
pub struct Metrics {
    published: AtomicU64,
    consumed: AtomicU64,
    rejected: AtomicU64,
    publish_waits: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub rejected: u64,
    pub publish_waits: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_published(&self, n: u64) {
        self.published.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_consumed(&self, n: u64) {
        self.consumed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_publish_waits(&self, n: u64) {
        self.publish_waits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            publish_waits: self.publish_waits.load(Ordering::Relaxed),
        }
    }
}
