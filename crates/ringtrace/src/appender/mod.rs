//! Asynchronous Appender Pipeline
//!
//! Producers publish [`QueueEvent`]s into one bounded [`ringcast::RingBuffer`];
//! a fixed pool of consumer threads drains it. Every consumer reads the whole
//! stream in publish order but only handles the categories pinned to it
//! (`category index % consumers`), so each sink is driven by exactly one
//! thread and each category is written in FIFO order.
//!
//! Two publish modes:
//! - **Blocking**: wait for a free slot. No loss; may stall producers.
//! - **Discard**: try once. A full ring counts the event as discarded and
//!   returns [`AppendError::Rejected`]. Discards are reported every
//!   `discard_threshold` events, and optionally per event with a throttle.

mod event;
mod registry;
mod sink;

pub use event::{CategoryId, Payload, QueueEvent};
pub use registry::CategoryRegistry;
pub use sink::{EventSink, RollingSink};

use crate::config::AppenderConfig;
use crate::rolling::StoreError;
use crate::span::FinishedSpan;
use crate::throttle::{IntervalThrottle, Throttle};
use parking_lot::{Mutex, RwLock};
use ringcast::{Backoff, Consumer, ConsumerError, PublishError, RingBuffer};
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const CONSUME_BATCH: usize = 256;
const IDLE_MAX_SLEEP: Duration = Duration::from_millis(10);
const DISCARD_ID_LOG_INTERVAL: Duration = Duration::from_secs(1);

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Error types for the appender pipeline
#[derive(Debug, Error)]
pub enum AppendError {
    /// Ring full in discard mode; the event was dropped
    #[error("queue full, event discarded")]
    Rejected,
    /// Pipeline shut down
    #[error("appender is shut down")]
    Closed,
    /// Publish before `start`
    #[error("appender not started")]
    NotStarted,
    /// Registration or start after `start`
    #[error("appender already started")]
    AlreadyStarted,
    #[error("unknown category {0}")]
    UnknownCategory(CategoryId),
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A sink could not write an event
    #[error("sink failure: {0}")]
    Sink(String),
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct AppenderMetrics {
    /// Events accepted by the ring
    pub published: AtomicU64,
    /// Events dropped because the ring was full (monotonic)
    pub discarded: AtomicU64,
    /// Events written by a sink
    pub delivered: AtomicU64,
    /// Events a sink failed to write
    pub sink_errors: AtomicU64,
}

impl AppenderMetrics {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }
}

/// Bounded multi-producer pipeline feeding per-category sinks.
///
/// Lifecycle: [`new`](Self::new) → [`register`](Self::register) each category
/// → [`start`](Self::start) → [`publish`](Self::publish) from any thread →
/// [`shutdown`](Self::shutdown), which drains published events before joining
/// the consumers. Dropping the appender shuts it down.
pub struct AsyncAppender {
    config: AppenderConfig,
    ring: RingBuffer<QueueEvent>,
    state: AtomicU8,
    categories: RwLock<Vec<String>>,
    category_count: AtomicUsize,
    pending: Mutex<Vec<(CategoryId, Box<dyn EventSink>)>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<AppenderMetrics>,
    discard_window: AtomicU64,
    discard_id_throttle: IntervalThrottle,
}

impl AsyncAppender {
    pub fn new(config: AppenderConfig) -> Self {
        let consumers = config.consumers.max(1);
        let ring = RingBuffer::new(ringcast::Config::new(
            config.buffer_size.max(1),
            consumers,
            false,
        ));
        Self {
            config,
            ring,
            state: AtomicU8::new(STATE_NEW),
            categories: RwLock::new(Vec::new()),
            category_count: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            metrics: Arc::new(AppenderMetrics::default()),
            discard_window: AtomicU64::new(0),
            discard_id_throttle: IntervalThrottle::new(DISCARD_ID_LOG_INTERVAL),
        }
    }

    /// Ring capacity after rounding.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn consumers(&self) -> usize {
        self.ring.consumers()
    }

    pub fn metrics(&self) -> &Arc<AppenderMetrics> {
        &self.metrics
    }

    /// Total events discarded since creation.
    pub fn discarded(&self) -> u64 {
        self.metrics.discarded()
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    pub fn category_name(&self, category: CategoryId) -> Option<String> {
        self.categories.read().get(category.0).cloned()
    }

    /// Index of the consumer thread that handles `category`.
    pub fn consumer_for(&self, category: CategoryId) -> usize {
        category.0 % self.ring.consumers()
    }

    /// Add a category. Only allowed before [`start`](Self::start).
    pub fn register(&self, name: &str, sink: Box<dyn EventSink>) -> Result<CategoryId, AppendError> {
        let mut pending = self.pending.lock();
        if self.state.load(Ordering::Acquire) != STATE_NEW {
            return Err(AppendError::AlreadyStarted);
        }
        let mut names = self.categories.write();
        let id = CategoryId(names.len());
        names.push(name.to_string());
        pending.push((id, sink));
        debug!(category = name, consumer = self.consumer_for(id), "registered log category");
        Ok(id)
    }

    /// Spawn the consumer threads, handing each its pinned sinks.
    pub fn start(&self) -> Result<(), AppendError> {
        let mut pending = self.pending.lock();
        match self.state.load(Ordering::Acquire) {
            STATE_NEW => {}
            STATE_RUNNING => return Err(AppendError::AlreadyStarted),
            _ => return Err(AppendError::Closed),
        }

        let consumers = self.ring.consumers();
        let mut pinned: Vec<HashMap<CategoryId, Box<dyn EventSink>>> =
            (0..consumers).map(|_| HashMap::new()).collect();
        for (id, sink) in pending.drain(..) {
            pinned[id.0 % consumers].insert(id, sink);
        }
        let names: Arc<[String]> = self.categories.read().clone().into();
        self.category_count.store(names.len(), Ordering::Release);

        let mut workers = self.workers.lock();
        for (index, sinks) in pinned.into_iter().enumerate() {
            let spawned = self
                .ring
                .consumer(index)
                .map_err(AppendError::from)
                .and_then(|consumer| {
                    let names = Arc::clone(&names);
                    let metrics = Arc::clone(&self.metrics);
                    thread::Builder::new()
                        .name(format!("ringtrace-appender-{index}"))
                        .spawn(move || run_consumer(consumer, sinks, &names, &metrics))
                        .map_err(AppendError::Spawn)
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    error!(error = %err, consumer = index, "failed to start appender consumer");
                    self.state.store(STATE_STOPPED, Ordering::Release);
                    self.ring.close();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        self.state.store(STATE_RUNNING, Ordering::Release);
        info!(
            consumers,
            categories = names.len(),
            capacity = self.ring.capacity(),
            discard = self.config.discard,
            "appender started"
        );
        Ok(())
    }

    /// Enqueue a payload for `category`.
    ///
    /// Blocking mode waits for a free slot. Discard mode returns
    /// [`AppendError::Rejected`] when the ring is full.
    pub fn publish(&self, category: CategoryId, payload: Payload) -> Result<(), AppendError> {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => {}
            STATE_NEW => return Err(AppendError::NotStarted),
            _ => return Err(AppendError::Closed),
        }
        if category.0 >= self.category_count.load(Ordering::Acquire) {
            return Err(AppendError::UnknownCategory(category));
        }

        let event = QueueEvent { category, payload };
        if !self.config.discard {
            self.ring.publish(event).map_err(|_| AppendError::Closed)?;
            self.metrics.published.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let discarded_span = match (&event.payload, self.config.log_discarded_ids) {
            (Payload::Span(span), true) => Some(Arc::clone(span)),
            _ => None,
        };
        match self.ring.try_publish(event) {
            Ok(()) => {
                self.metrics.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(PublishError::Full) => {
                self.record_discard(category, discarded_span);
                Err(AppendError::Rejected)
            }
            Err(PublishError::Closed) => Err(AppendError::Closed),
        }
    }

    fn record_discard(&self, category: CategoryId, span: Option<Arc<FinishedSpan>>) {
        let total = self.metrics.discarded.fetch_add(1, Ordering::Relaxed) + 1;
        let window = self.discard_window.fetch_add(1, Ordering::AcqRel) + 1;
        if window >= self.config.discard_threshold
            && self
                .discard_window
                .compare_exchange(window, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            warn!(
                discarded = window,
                total,
                capacity = self.ring.capacity(),
                "appender queue full, events discarded"
            );
        }

        if let Some(span) = span {
            if let Some(suppressed) = self.discard_id_throttle.try_acquire() {
                warn!(
                    category = self.category_name(category).as_deref().unwrap_or("?"),
                    trace_id = %span.context().trace_id(),
                    span_id = %span.context().span_id(),
                    suppressed,
                    "discarded span"
                );
            }
        }
    }

    /// Stop accepting events, let consumers drain what was published, and
    /// join them. Idempotent.
    pub fn shutdown(&self) {
        let previous = self.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if previous == STATE_STOPPED {
            return;
        }
        self.ring.close();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                error!("appender consumer thread panicked");
            }
        }
        self.pending.lock().clear();

        if previous == STATE_RUNNING {
            info!(
                published = self.metrics.published(),
                delivered = self.metrics.delivered(),
                discarded = self.metrics.discarded(),
                "appender shut down"
            );
        }
    }
}

impl Drop for AsyncAppender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_consumer(
    consumer: Consumer<QueueEvent>,
    mut sinks: HashMap<CategoryId, Box<dyn EventSink>>,
    names: &[String],
    metrics: &AppenderMetrics,
) {
    let mut backoff = Backoff::new(IDLE_MAX_SLEEP);
    loop {
        let handled = consumer.consume_up_to(CONSUME_BATCH, |_, event| {
            if let Some(sink) = sinks.get_mut(&event.category) {
                deliver(sink.as_mut(), event, names, metrics);
            }
        });
        if handled > 0 {
            backoff.reset();
            continue;
        }
        if consumer.is_drained() {
            break;
        }
        backoff.wait();
    }

    for (category, sink) in sinks.iter_mut() {
        if let Err(err) = sink.flush() {
            warn!(category = names.get(category.0).map(String::as_str).unwrap_or("?"), error = %err, "final flush failed");
        }
    }
    debug!(consumer = consumer.id(), "appender consumer stopped");
}

fn deliver(sink: &mut dyn EventSink, event: &QueueEvent, names: &[String], metrics: &AppenderMetrics) {
    let failure = match panic::catch_unwind(AssertUnwindSafe(|| sink.append(&event.payload))) {
        Ok(Ok(())) => {
            metrics.delivered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Ok(Err(err)) => err.to_string(),
        Err(_) => "sink panicked".to_string(),
    };
    metrics.sink_errors.fetch_add(1, Ordering::Relaxed);
    error!(
        category = names.get(event.category.0).map(String::as_str).unwrap_or("?"),
        trace_id = event.payload.trace_id().unwrap_or("-"),
        span_id = event.payload.span_id().unwrap_or("-"),
        error = %failure,
        "failed to append event"
    );
}
