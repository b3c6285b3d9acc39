use super::RollingFileStore;
use crate::timer::PeriodicTask;
use parking_lot::Mutex;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default flush cadence.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Stores flushed by a [`FlushTimer`]. Holds weak references, so a dropped
/// store simply falls out of the set.
#[derive(Debug, Clone, Default)]
pub struct FlushRegistry {
    stores: Arc<Mutex<Vec<Weak<RollingFileStore>>>>,
}

impl FlushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, store: &Arc<RollingFileStore>) {
        self.stores.lock().push(Arc::downgrade(store));
    }

    /// Flush every live store; returns how many were flushed.
    pub fn flush_all(&self) -> usize {
        let live: Vec<Arc<RollingFileStore>> = {
            let mut stores = self.stores.lock();
            stores.retain(|s| s.strong_count() > 0);
            stores.iter().filter_map(Weak::upgrade).collect()
        };
        for store in &live {
            store.flush();
        }
        live.len()
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background thread flushing a [`FlushRegistry`] at a fixed cadence.
/// Stops, after a final flush, when dropped.
pub struct FlushTimer {
    registry: FlushRegistry,
    task: PeriodicTask,
}

impl FlushTimer {
    pub fn start(registry: FlushRegistry, interval: Duration) -> io::Result<Self> {
        let flushing = registry.clone();
        let task = PeriodicTask::spawn("ringtrace-flush", interval, move || {
            flushing.flush_all();
        })?;
        Ok(Self { registry, task })
    }

    pub fn registry(&self) -> &FlushRegistry {
        &self.registry
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.task.stop();
        self.registry.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::rolling::{DatePattern, RetentionPolicy, StoreOptions};
    use std::fs;
    use std::thread;

    fn open(dir: &std::path::Path, name: &str) -> Arc<RollingFileStore> {
        let options = StoreOptions {
            pattern: DatePattern::parse("'.'yyyy-MM-dd").unwrap(),
            retention: RetentionPolicy::days(1),
            clock: Arc::new(SystemClock),
        };
        Arc::new(RollingFileStore::open(dir, name, options).unwrap())
    }

    #[test]
    fn test_timer_flushes_buffered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "timed.log");
        let registry = FlushRegistry::new();
        registry.register(&store);

        let _timer = FlushTimer::start(registry, Duration::from_millis(10)).unwrap();
        store.append("buffered");
        thread::sleep(Duration::from_millis(100));

        assert_eq!(fs::read_to_string(store.path()).unwrap(), "buffered\n");
    }

    #[test]
    fn test_dropped_stores_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FlushRegistry::new();
        let kept = open(dir.path(), "kept.log");
        registry.register(&kept);
        registry.register(&open(dir.path(), "dropped.log"));

        assert_eq!(registry.flush_all(), 1);
        assert_eq!(registry.len(), 1);
    }
}
