use crate::invariants::{
    debug_assert_bounded_count, debug_assert_monotonic, debug_assert_pending, debug_assert_stamp,
};
use crate::{Backoff, Config, Metrics, MetricsSnapshot};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Many producers publish into one ring; every consumer observes every event
// (multicast) through its own cursor.
//
// ## Sequence Numbers (ABA Prevention)
//
// `claim` and the consumer cursors are unbounded u64 sequence numbers. The
// slot index is `sequence & mask`, computed only when touching a slot. Each
// slot carries a `stamp` equal to `sequence + 1` of the value it holds, so a
// consumer can tell a freshly published value from last lap's leftovers.
//
// ## Memory Ordering Protocol
//
// **Producer (publish path):**
// 1. Load `claim` with Relaxed, `gating_cache` with Acquire
// 2. If the cache shows no room: load every cursor with Acquire and
//    publish the minimum into `gating_cache` with Release (fetch_max)
// 3. CAS `claim` from seq to seq + 1 (AcqRel) to own sequence `seq`
// 4. Write the value into the slot (no ordering needed - slot is owned)
// 5. Store `stamp = seq + 1` with Release (publishes the value)
//
// **Consumer (read path):**
// 1. Load own cursor with Relaxed (only this consumer writes it)
// 2. Load the slot `stamp` with Acquire (synchronizes with step 5 above)
// 3. Hand `&T` to the handler
// 4. Decrement the slot `pending` reader count (AcqRel); the last reader
//    takes the value out of the slot, which drops it
// 5. After the batch, store the cursor with Release
//
// A producer can only claim `seq` once every cursor is past `seq - capacity`,
// and every cursor store happens after that consumer's release of the slot,
// so the slot is empty and unobserved when it is rewritten.
//
// =============================================================================

/// Error returned when a value cannot be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// No free slot (only returned by [`RingBuffer::try_publish`]).
    #[error("ring buffer is full")]
    Full,
    /// The ring has been closed.
    #[error("ring buffer is closed")]
    Closed,
}

/// Error returned when acquiring a consumer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// The requested consumer index does not exist.
    #[error("consumer {id} out of range (consumers: {consumers})")]
    OutOfRange {
        /// Requested index.
        id: usize,
        /// Configured consumer count.
        consumers: usize,
    },
    /// Another handle already owns this consumer cursor.
    #[error("consumer {id} is already claimed")]
    AlreadyClaimed {
        /// Requested index.
        id: usize,
    },
}

/// A pre-allocated slot, overwritten in place on every lap.
struct Slot<T> {
    /// `sequence + 1` of the value currently held; 0 when never written.
    stamp: AtomicU64,
    /// Consumers that have not yet released the current value.
    pending: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            stamp: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            value: UnsafeCell::new(None),
        }
    }

    /// Called once per consumer after it is done with the value.
    #[inline]
    fn release(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert_pending!(previous);
        if previous == 1 {
            // SAFETY: every other consumer released this slot before our
            // decrement observed theirs (AcqRel on `pending`), and no
            // producer may claim it until our cursor moves past it.
            unsafe {
                (*self.value.get()).take();
            }
        }
    }
}

struct RingInner<T> {
    /// Next sequence to hand out to a producer.
    claim: CachePadded<AtomicU64>,
    /// Last observed minimum of all consumer cursors.
    gating_cache: CachePadded<AtomicU64>,
    /// Next sequence each consumer will read.
    cursors: Box<[CachePadded<AtomicU64>]>,
    /// Whether a `Consumer` handle currently owns each cursor.
    owned: Box<[AtomicBool]>,
    slots: Box<[Slot<T>]>,
    closed: AtomicBool,
    metrics: Metrics,
    config: Config,
    capacity: usize,
    mask: usize,
}

// Safety: values move between producer and consumer threads (Send) and are
// read by several consumers at once through `&T` (Sync). Every slot access is
// ordered by the stamp/pending/cursor protocol described above.
unsafe impl<T: Send> Send for RingInner<T> {}
unsafe impl<T: Send + Sync> Sync for RingInner<T> {}

impl<T> RingInner<T> {
    #[inline]
    fn slot(&self, seq: u64) -> &Slot<T> {
        &self.slots[(seq as usize) & self.mask]
    }

    fn min_cursor(&self) -> u64 {
        self.cursors
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }
}

/// Bounded multi-producer ring buffer with multicast consumers.
///
/// - Capacity is rounded up to the next power of two
/// - Any thread may publish through a shared reference (or a clone)
/// - Every consumer sees every event, in global publish order
/// - Consumers advance their cursor once per batch
pub struct RingBuffer<T> {
    inner: Arc<RingInner<T>>,
}

impl<T> RingBuffer<T> {
    /// Creates a new ring buffer with the given configuration.
    pub fn new(config: Config) -> Self {
        let capacity = config.capacity();
        let consumers = config.consumers.max(1);

        let slots: Box<[Slot<T>]> = (0..capacity).map(|_| Slot::new()).collect();
        let cursors: Box<[CachePadded<AtomicU64>]> = (0..consumers)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect();
        let owned: Box<[AtomicBool]> = (0..consumers).map(|_| AtomicBool::new(false)).collect();

        Self {
            inner: Arc::new(RingInner {
                claim: CachePadded::new(AtomicU64::new(0)),
                gating_cache: CachePadded::new(AtomicU64::new(0)),
                cursors,
                owned,
                slots,
                closed: AtomicBool::new(false),
                metrics: Metrics::new(),
                config: Config {
                    consumers,
                    ..config
                },
                capacity,
                mask: config.mask(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // CONSTANTS & STATUS
    // ---------------------------------------------------------------------

    /// Returns the ring buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of consumer cursors.
    #[inline]
    pub fn consumers(&self) -> usize {
        self.inner.cursors.len()
    }

    /// Returns the number of claimed slots not yet released by every consumer.
    #[inline]
    pub fn len(&self) -> usize {
        let claim = self.inner.claim.load(Ordering::Acquire);
        claim.saturating_sub(self.inner.min_cursor()) as usize
    }

    /// Returns true if every consumer has caught up.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if no slot can be claimed right now.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Returns the next sequence a producer would claim.
    #[inline]
    pub fn claimed(&self) -> u64 {
        self.inner.claim.load(Ordering::Acquire)
    }

    /// Returns true if the ring is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claim the next sequence if a slot is free. Returns None if full.
    ///
    /// Fast path uses the shared gating cache to avoid scanning cursors.
    /// Slow path refreshes the cache only when it shows no room.
    fn try_claim(&self) -> Option<u64> {
        let inner = &*self.inner;
        let cap = inner.capacity as u64;
        let mut seq = inner.claim.load(Ordering::Relaxed);

        loop {
            let mut gate = inner.gating_cache.load(Ordering::Acquire);
            if seq >= gate + cap {
                // Slow path: refresh cache
                gate = inner.min_cursor();
                inner.gating_cache.fetch_max(gate, Ordering::AcqRel);
                if seq >= gate + cap {
                    return None;
                }
            }

            // SeqCst pairs with `close` and `is_drained`: see `commit`
            match inner.claim.compare_exchange_weak(
                seq,
                seq + 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug_assert_bounded_count!((seq + 1).saturating_sub(gate), inner.capacity);
                    return Some(seq);
                }
                Err(current) => seq = current,
            }
        }
    }

    /// Internal: move the value into its slot and publish the stamp.
    fn write(&self, seq: u64, value: T) {
        let inner = &*self.inner;
        let slot = inner.slot(seq);

        // SAFETY: `try_claim` handed `seq` to this producer alone, and every
        // consumer cursor is past `seq - capacity`, so no reader holds the
        // slot. The previous value was taken by its last reader.
        unsafe {
            *slot.value.get() = Some(value);
        }
        slot.pending.store(inner.cursors.len(), Ordering::Relaxed);
        slot.stamp.store(seq + 1, Ordering::Release);

        if inner.config.enable_metrics {
            inner.metrics.add_published(1);
        }
    }

    /// Internal: write a claimed slot, then confirm the ring was still open.
    ///
    /// A claimed slot is always written so consumers never stall on it. If
    /// `close` raced the claim the value may never be read, so `Closed` is
    /// returned. An open ring observed here happens before the close in the
    /// SeqCst order, so every drained consumer has seen this claim.
    fn commit(&self, seq: u64, value: T) -> Result<(), PublishError> {
        self.write(seq, value);
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }
        Ok(())
    }

    /// Publish without waiting.
    ///
    /// Returns `Err(PublishError::Full)` when every slot is still in use, in
    /// which case `value` is dropped.
    #[inline]
    pub fn try_publish(&self, value: T) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }
        match self.try_claim() {
            Some(seq) => self.commit(seq, value),
            None => {
                if self.inner.config.enable_metrics {
                    self.inner.metrics.add_rejected(1);
                }
                Err(PublishError::Full)
            }
        }
    }

    /// Publish, waiting for a free slot with adaptive backoff.
    ///
    /// Only fails once the ring is closed.
    pub fn publish(&self, value: T) -> Result<(), PublishError> {
        let mut backoff = Backoff::new(Duration::from_millis(1));
        let mut waited = false;
        loop {
            if self.is_closed() {
                return Err(PublishError::Closed);
            }
            if let Some(seq) = self.try_claim() {
                if waited && self.inner.config.enable_metrics {
                    self.inner.metrics.add_publish_waits(1);
                }
                return self.commit(seq, value);
            }
            waited = true;
            backoff.wait();
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Take ownership of consumer cursor `id`.
    ///
    /// Each cursor may be owned by one handle at a time; the handle releases
    /// it on drop.
    pub fn consumer(&self, id: usize) -> Result<Consumer<T>, ConsumerError> {
        let consumers = self.consumers();
        let owned = self
            .inner
            .owned
            .get(id)
            .ok_or(ConsumerError::OutOfRange { id, consumers })?;
        if owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsumerError::AlreadyClaimed { id });
        }
        Ok(Consumer {
            ring: Arc::clone(&self.inner),
            id,
        })
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Close the ring. Pending values stay readable; publishing fails.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Get a snapshot of metrics if enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        if self.inner.config.enable_metrics {
            self.inner.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Exclusive handle on one consumer cursor.
///
/// Intentionally not `Clone`: two threads advancing the same cursor would
/// release slots twice.
pub struct Consumer<T> {
    ring: Arc<RingInner<T>>,
    id: usize,
}

impl<T> Consumer<T> {
    /// Returns this consumer's index.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the next sequence this consumer will read.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.ring.cursors[self.id].load(Ordering::Relaxed)
    }

    /// True once this consumer has read everything claimed so far and the
    /// ring is closed.
    pub fn is_drained(&self) -> bool {
        self.ring.closed.load(Ordering::SeqCst)
            && self.cursor() >= self.ring.claim.load(Ordering::SeqCst)
    }

    /// Process up to `max_items` published values in sequence order with a
    /// single cursor update.
    ///
    /// The handler receives the sequence number and a shared reference; the
    /// value is dropped by whichever consumer releases it last. Stops early
    /// at the first slot whose producer has claimed but not yet published.
    pub fn consume_up_to<F>(&self, max_items: usize, mut handler: F) -> usize
    where
        F: FnMut(u64, &T),
    {
        if max_items == 0 {
            return 0;
        }

        let ring = &*self.ring;
        let cursor = &ring.cursors[self.id];
        let start = cursor.load(Ordering::Relaxed);
        let mut seq = start;

        while seq - start < max_items as u64 {
            let slot = ring.slot(seq);
            let stamp = slot.stamp.load(Ordering::Acquire);
            if stamp != seq + 1 {
                break;
            }
            debug_assert_stamp!(stamp, seq);

            // SAFETY: the Acquire load of `stamp` synchronizes with the
            // producer's Release store; the value stays in place until every
            // consumer, including this one, has released the slot.
            let value = unsafe { (*slot.value.get()).as_ref() };
            if let Some(value) = value {
                handler(seq, value);
            }
            slot.release();
            seq += 1;
        }

        let count = seq - start;
        if count > 0 {
            debug_assert_monotonic!("cursor", start, seq);
            // Single atomic update for the batch
            cursor.store(seq, Ordering::Release);
            if ring.config.enable_metrics {
                ring.metrics.add_consumed(count);
            }
        }
        count as usize
    }

    /// Process every currently published value.
    pub fn consume_all<F>(&self, handler: F) -> usize
    where
        F: FnMut(u64, &T),
    {
        self.consume_up_to(usize::MAX, handler)
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.ring.owned[self.id].store(false, Ordering::Release);
    }
}
