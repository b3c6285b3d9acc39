//! Periodic span statistics.
//!
//! [`StatAggregator`] accumulates fixed-width counters per [`StatKey`] into one
//! of two buckets. Writers always target the current bucket; a flip moves the
//! current index with one atomic store and hands back the previous contents.
//! [`StatReporter`] folds finished spans into an aggregator and, when its
//! interval has elapsed, emits one JSON line per key through the appender.

use crate::appender::{AppendError, AsyncAppender, CategoryId, Payload};
use crate::clock::Clock;
use crate::span::{tags, FinishedSpan, TagValue};
use crate::timer::PeriodicTask;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Dimension holding the application name.
pub const APP_DIM: &str = "local.app";
/// Dimension holding the method, or the operation name when untagged.
pub const METHOD_DIM: &str = "method";

/// Cadence of [`StatTimer`] cycles.
pub const STAT_CYCLE: Duration = Duration::from_secs(1);

/// Counters per key: `[count, total duration ms]`.
pub const SPAN_STAT_WIDTH: usize = 2;

/// Aggregation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatKey {
    dims: BTreeMap<String, String>,
    result: String,
    load_test: bool,
}

impl StatKey {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            dims: BTreeMap::new(),
            result: result.into(),
            load_test: false,
        }
    }

    pub fn with_dim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dims.insert(key.into(), value.into());
        self
    }

    pub fn with_load_test(mut self, load_test: bool) -> Self {
        self.load_test = load_test;
        self
    }

    pub fn dims(&self) -> &BTreeMap<String, String> {
        &self.dims
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn is_load_test(&self) -> bool {
        self.load_test
    }
}

/// Fixed-width additive counters.
#[derive(Debug)]
pub struct StatValues {
    counters: Box<[AtomicU64]>,
}

impl StatValues {
    fn new(width: usize) -> Self {
        Self {
            counters: (0..width).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn add(&self, values: &[u64]) {
        for (counter, value) in self.counters.iter().zip(values) {
            counter.fetch_add(*value, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

/// Double-buffered key → counters map.
///
/// The write lock of a bucket is taken only to insert a key seen for the first
/// time in the current window, and by [`flip`](Self::flip) to take the
/// previous bucket. A write racing a flip may land in either window.
#[derive(Debug)]
pub struct StatAggregator {
    width: usize,
    interval_cycles: u64,
    elapsed_cycles: AtomicU64,
    current: AtomicUsize,
    buckets: [RwLock<HashMap<StatKey, StatValues>>; 2],
}

impl StatAggregator {
    /// `width` counters per key, printed every `interval_cycles` cycles.
    pub fn new(width: usize, interval_cycles: u64) -> Self {
        Self {
            width,
            interval_cycles: interval_cycles.max(1),
            elapsed_cycles: AtomicU64::new(0),
            current: AtomicUsize::new(0),
            buckets: [RwLock::new(HashMap::new()), RwLock::new(HashMap::new())],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Add `values` to the counters of `key` in the current window. Extra
    /// values beyond the width are ignored.
    pub fn add_stat(&self, key: &StatKey, values: &[u64]) {
        let bucket = &self.buckets[self.current.load(Ordering::Acquire)];
        {
            let map = bucket.read();
            if let Some(existing) = map.get(key) {
                existing.add(values);
                return;
            }
        }
        let mut map = bucket.write();
        map.entry(key.clone())
            .or_insert_with(|| StatValues::new(self.width))
            .add(values);
    }

    /// Count one cycle; true on every `interval_cycles`-th call.
    pub fn should_print_now(&self) -> bool {
        let elapsed = self.elapsed_cycles.fetch_add(1, Ordering::AcqRel) + 1;
        elapsed % self.interval_cycles == 0
    }

    /// Switch writers to the other bucket and return the previous window,
    /// sorted by key. The returned bucket is left empty for reuse.
    pub fn flip(&self) -> Vec<(StatKey, Vec<u64>)> {
        let previous = self.current.fetch_xor(1, Ordering::AcqRel);
        let drained = std::mem::take(&mut *self.buckets[previous].write());
        let mut window: Vec<_> = drained
            .into_iter()
            .map(|(key, values)| (key, values.snapshot()))
            .collect();
        window.sort_by(|a, b| a.0.cmp(&b.0));
        window
    }

    /// Counters of `key` in the current window.
    pub fn current_value(&self, key: &StatKey) -> Option<Vec<u64>> {
        self.buckets[self.current.load(Ordering::Acquire)]
            .read()
            .get(key)
            .map(StatValues::snapshot)
    }
}

/// Maps a finished span to its stat key. `None` skips the span.
pub trait StatKeyExtractor: Send + Sync {
    fn extract(&self, span: &FinishedSpan) -> Option<StatKey>;
}

/// `local.app` and `method` dimensions. The method is the `method` tag when
/// present, else the operation name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStatKeyExtractor;

impl StatKeyExtractor for DefaultStatKeyExtractor {
    fn extract(&self, span: &FinishedSpan) -> Option<StatKey> {
        let method = match span.tag(tags::METHOD) {
            Some(TagValue::String(method)) => method.clone(),
            Some(other) => other.to_string(),
            None => span.operation_name().to_string(),
        };
        Some(
            StatKey::new(span.result_code())
                .with_dim(APP_DIM, span.app_name())
                .with_dim(METHOD_DIM, method)
                .with_load_test(span.context().is_load_test()),
        )
    }
}

/// Folds spans into an aggregator and emits stat lines to one category.
pub struct StatReporter {
    name: String,
    aggregator: StatAggregator,
    extractor: Arc<dyn StatKeyExtractor>,
    appender: Arc<AsyncAppender>,
    category: CategoryId,
    clock: Arc<dyn Clock>,
}

impl StatReporter {
    /// Emits every `interval_secs` [`STAT_CYCLE`]s.
    pub fn new(
        name: impl Into<String>,
        appender: Arc<AsyncAppender>,
        category: CategoryId,
        clock: Arc<dyn Clock>,
        interval_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            aggregator: StatAggregator::new(SPAN_STAT_WIDTH, interval_secs),
            extractor: Arc::new(DefaultStatKeyExtractor),
            appender,
            category,
            clock,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StatKeyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aggregator(&self) -> &StatAggregator {
        &self.aggregator
    }

    /// Add one count and the span's duration under its key.
    pub fn report_span(&self, span: &FinishedSpan) {
        if let Some(key) = self.extractor.extract(span) {
            self.aggregator
                .add_stat(&key, &[1, span.duration_millis()]);
        }
    }

    /// One timer cycle: emit if the interval has elapsed.
    pub fn tick(&self) {
        if self.aggregator.should_print_now() {
            self.emit();
        }
    }

    /// Flip and publish the previous window; returns the lines accepted.
    pub fn emit(&self) -> usize {
        let window = self.aggregator.flip();
        if window.is_empty() {
            return 0;
        }
        let time = self.clock.now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let mut published = 0;
        for (key, values) in &window {
            let payload = Payload::Line {
                text: encode_stat_line(&time, key, values),
                shadow: key.is_load_test(),
            };
            match self.appender.publish(self.category, payload) {
                Ok(()) => published += 1,
                Err(AppendError::Rejected) => {}
                Err(err) => {
                    debug!(reporter = %self.name, error = %err, "stat line not published");
                }
            }
        }
        published
    }
}

fn encode_stat_line(time: &str, key: &StatKey, values: &[u64]) -> String {
    let mut line = Map::new();
    line.insert("time".into(), Value::from(time));
    for (dim, value) in key.dims() {
        line.insert(dim.clone(), Value::from(value.as_str()));
    }
    line.insert("result".into(), Value::from(key.result()));
    line.insert("count".into(), Value::from(values.first().copied().unwrap_or(0)));
    line.insert(
        "total.cost.milliseconds".into(),
        Value::from(values.get(1).copied().unwrap_or(0)),
    );
    line.insert("load.test".into(), Value::from(key.is_load_test()));
    Value::Object(line).to_string()
}

/// Background thread ticking registered [`StatReporter`]s once per cycle.
/// Emits whatever is pending when dropped.
pub struct StatTimer {
    reporters: Arc<Mutex<Vec<Weak<StatReporter>>>>,
    task: PeriodicTask,
}

impl StatTimer {
    pub fn start(cycle: Duration) -> io::Result<Self> {
        let reporters: Arc<Mutex<Vec<Weak<StatReporter>>>> = Arc::default();
        let ticking = Arc::clone(&reporters);
        let task = PeriodicTask::spawn("ringtrace-stat", cycle, move || {
            for reporter in live(&ticking) {
                reporter.tick();
            }
        })?;
        Ok(Self { reporters, task })
    }

    pub fn register(&self, reporter: &Arc<StatReporter>) {
        self.reporters.lock().push(Arc::downgrade(reporter));
    }

    /// Stop ticking and emit pending windows.
    pub fn stop(&mut self) {
        self.task.stop();
        for reporter in live(&self.reporters) {
            let emitted = reporter.emit();
            if emitted > 0 {
                debug!(reporter = reporter.name(), emitted, "emitted pending stats");
            }
        }
    }
}

fn live(reporters: &Mutex<Vec<Weak<StatReporter>>>) -> Vec<Arc<StatReporter>> {
    let mut reporters = reporters.lock();
    reporters.retain(|r| r.strong_count() > 0);
    reporters.iter().filter_map(Weak::upgrade).collect()
}

impl Drop for StatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StatReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatReporter")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for StatTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatTimer").finish_non_exhaustive()
    }
}
