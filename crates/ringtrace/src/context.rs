//! Trace identity: trace ids, dotted span ids and the propagated context.

use crate::clock::{Clock, SystemClock};
use crate::propagation::escape::{escape, unescape};
use crate::propagation::CodecError;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Span id of every root span.
pub const ROOT_SPAN_ID: &str = "0";

/// Maximum number of dotted segments before a child is rebased onto a new trace.
pub const MAX_SPAN_DEPTH: usize = 150;

/// System baggage key marking load-test traffic.
pub const LOAD_TEST_KEY: &str = "mark";
/// Value of [`LOAD_TEST_KEY`] for load-test traffic.
pub const LOAD_TEST_VALUE: &str = "T";

const SEQUENCE_MIN: u32 = 1000;
const SEQUENCE_MAX: u32 = 9000;

/// Mints trace ids of the form
/// `<8 hex host ip><13 digit epoch millis><4 digit sequence><4 hex random>`.
#[derive(Debug)]
pub struct TraceIdGenerator {
    ip_hex: String,
    sequence: AtomicU32,
    clock: Arc<dyn Clock>,
}

impl TraceIdGenerator {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self::with_clock(ip, Arc::new(SystemClock))
    }

    pub fn with_clock(ip: Ipv4Addr, clock: Arc<dyn Clock>) -> Self {
        let ip_hex = ip.octets().iter().fold(String::with_capacity(8), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        });
        Self {
            ip_hex,
            sequence: AtomicU32::new(SEQUENCE_MIN),
            clock,
        }
    }

    pub fn generate(&self) -> String {
        let seq = self.next_sequence();
        let salt: u16 = rand::thread_rng().gen();
        format!(
            "{}{:013}{:04}{:04x}",
            self.ip_hex,
            self.clock.now_millis(),
            seq,
            salt
        )
    }

    fn next_sequence(&self) -> u32 {
        let prev = self
            .sequence
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(if cur >= SEQUENCE_MAX { SEQUENCE_MIN } else { cur + 1 })
            })
            .unwrap_or(SEQUENCE_MIN);
        if prev >= SEQUENCE_MAX {
            SEQUENCE_MIN
        } else {
            prev + 1
        }
    }
}

/// Identity, sampling flag and baggage carried across span and process
/// boundaries.
///
/// The trace, span and parent ids never change after construction. Clones
/// share the child counter, so children minted through any clone of the same
/// context get distinct ids.
#[derive(Clone)]
pub struct SpanContext {
    trace_id: String,
    span_id: String,
    parent_id: String,
    sampled: bool,
    biz_baggage: BTreeMap<String, String>,
    sys_baggage: BTreeMap<String, String>,
    child_counter: Arc<AtomicU32>,
}

impl SpanContext {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_id: impl Into<String>,
        sampled: bool,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_id: parent_id.into(),
            sampled,
            biz_baggage: BTreeMap::new(),
            sys_baggage: BTreeMap::new(),
            child_counter: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A root context; sampling is decided later by the sampler.
    pub fn root(trace_id: impl Into<String>) -> Self {
        Self::new(trace_id, ROOT_SPAN_ID, "", false)
    }

    /// Derive a child context: next dotted id, inherited trace id, sampling
    /// flag and baggage.
    ///
    /// A parent already at [`MAX_SPAN_DEPTH`] segments yields a rebased
    /// context on a fresh trace id instead.
    pub fn child_of(parent: &SpanContext, ids: &TraceIdGenerator) -> Self {
        let (trace_id, span_id, parent_id) = if parent.depth() >= MAX_SPAN_DEPTH {
            let trace_id = ids.generate();
            warn!(
                old_trace_id = %parent.trace_id,
                new_trace_id = %trace_id,
                depth = parent.depth(),
                "span depth limit reached, rebasing onto a new trace"
            );
            (trace_id, ROOT_SPAN_ID.to_string(), String::new())
        } else {
            (
                parent.trace_id.clone(),
                parent.next_child_id(),
                parent.span_id.clone(),
            )
        };

        Self {
            trace_id,
            span_id,
            parent_id,
            sampled: parent.sampled,
            biz_baggage: parent.biz_baggage.clone(),
            sys_baggage: parent.sys_baggage.clone(),
            child_counter: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Reserve the next child id of this context. The first child is `.1`.
    pub fn next_child_id(&self) -> String {
        let n = self.child_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{}", self.span_id, n)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn set_sampled(&mut self, sampled: bool) {
        self.sampled = sampled;
    }

    /// Number of dotted segments in the span id.
    pub fn depth(&self) -> usize {
        self.span_id.split('.').count()
    }

    pub fn biz_baggage(&self) -> &BTreeMap<String, String> {
        &self.biz_baggage
    }

    pub fn sys_baggage(&self) -> &BTreeMap<String, String> {
        &self.sys_baggage
    }

    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.biz_baggage.get(key).map(String::as_str)
    }

    pub fn sys_baggage_item(&self, key: &str) -> Option<&str> {
        self.sys_baggage.get(key).map(String::as_str)
    }

    pub fn set_baggage_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.biz_baggage.insert(key.into(), value.into());
    }

    pub fn set_sys_baggage_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.sys_baggage.insert(key.into(), value.into());
    }

    pub fn is_load_test(&self) -> bool {
        self.sys_baggage_item(LOAD_TEST_KEY) == Some(LOAD_TEST_VALUE)
    }

    /// Encode as `tcid=..&spid=..&pspid=..&sample=..&` followed by one
    /// `bz:<k>=<v>&` per business entry and `sy:<k>=<v>&` per system entry.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(96);
        let _ = write!(
            out,
            "tcid={}&spid={}&pspid={}&sample={}&",
            escape(&self.trace_id),
            escape(&self.span_id),
            escape(&self.parent_id),
            self.sampled
        );
        for (key, value) in &self.biz_baggage {
            let _ = write!(out, "bz:{}={}&", escape(key), escape(value));
        }
        for (key, value) in &self.sys_baggage {
            let _ = write!(out, "sy:{}={}&", escape(key), escape(value));
        }
        out
    }

    /// Inverse of [`serialize`](Self::serialize). Unknown fields are ignored;
    /// a missing span id defaults to the root id.
    pub fn deserialize(encoded: &str) -> Result<Self, CodecError> {
        let mut trace_id = None;
        let mut span_id = None;
        let mut parent_id = None;
        let mut sampled = false;
        let mut biz = BTreeMap::new();
        let mut sys = BTreeMap::new();

        for field in encoded.split('&').filter(|f| !f.is_empty()) {
            let Some((key, value)) = field.split_once('=') else {
                return Err(CodecError::Malformed(format!("field without '=': {field}")));
            };
            let value = unescape(value).into_owned();
            match key {
                "tcid" => trace_id = Some(value),
                "spid" => span_id = Some(value),
                "pspid" => parent_id = Some(value),
                "sample" => sampled = value == "true",
                _ => {
                    if let Some(k) = key.strip_prefix("bz:") {
                        biz.insert(unescape(k).into_owned(), value);
                    } else if let Some(k) = key.strip_prefix("sy:") {
                        sys.insert(unescape(k).into_owned(), value);
                    }
                }
            }
        }

        let trace_id = trace_id
            .filter(|t| !t.is_empty())
            .ok_or(CodecError::MissingTraceId)?;
        let mut ctx = Self::new(
            trace_id,
            span_id.unwrap_or_else(|| ROOT_SPAN_ID.to_string()),
            parent_id.unwrap_or_default(),
            sampled,
        );
        ctx.biz_baggage = biz;
        ctx.sys_baggage = sys;
        Ok(ctx)
    }
}

impl PartialEq for SpanContext {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id == other.trace_id
            && self.span_id == other.span_id
            && self.parent_id == other.parent_id
            && self.sampled == other.sampled
            && self.biz_baggage == other.biz_baggage
            && self.sys_baggage == other.sys_baggage
    }
}

impl Eq for SpanContext {}

impl fmt::Debug for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanContext")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_id", &self.parent_id)
            .field("sampled", &self.sampled)
            .field("biz_baggage", &self.biz_baggage)
            .field("sys_baggage", &self.sys_baggage)
            .finish()
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::thread;

    fn ids() -> TraceIdGenerator {
        TraceIdGenerator::with_clock(
            Ipv4Addr::new(10, 0, 0, 1),
            Arc::new(ManualClock::from_millis(1_700_000_000_123)),
        )
    }

    #[test]
    fn test_trace_id_layout() {
        let id = ids().generate();
        assert_eq!(id.len(), 29);
        assert!(id.starts_with("0a000001"));
        assert_eq!(&id[8..21], "1700000000123");
        assert_eq!(&id[21..25], "1001");
        assert!(id[25..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_trace_id_sequence_wraps() {
        let ids = ids();
        ids.sequence.store(SEQUENCE_MAX - 1, Ordering::Relaxed);
        assert_eq!(ids.next_sequence(), SEQUENCE_MAX);
        assert_eq!(ids.next_sequence(), SEQUENCE_MIN);
        assert_eq!(ids.next_sequence(), SEQUENCE_MIN + 1);
    }

    #[test]
    fn test_child_ids_are_dotted() {
        let ids = ids();
        let mut root = SpanContext::root(ids.generate());
        root.set_sampled(true);
        root.set_baggage_item("tenant", "acme");

        let a = SpanContext::child_of(&root, &ids);
        let b = SpanContext::child_of(&root, &ids);
        let a1 = SpanContext::child_of(&a, &ids);

        assert_eq!(a.span_id(), "0.1");
        assert_eq!(b.span_id(), "0.2");
        assert_eq!(a1.span_id(), "0.1.1");
        assert_eq!(a1.parent_id(), "0.1");
        assert_eq!(a1.trace_id(), root.trace_id());
        assert!(a1.is_sampled());
        assert_eq!(a1.baggage_item("tenant"), Some("acme"));
    }

    #[test]
    fn test_clones_share_child_counter() {
        let ids = ids();
        let root = SpanContext::root(ids.generate());
        let copy = root.clone();

        assert_eq!(SpanContext::child_of(&root, &ids).span_id(), "0.1");
        assert_eq!(SpanContext::child_of(&copy, &ids).span_id(), "0.2");
        assert_eq!(root, copy);
    }

    #[test]
    fn test_concurrent_children_never_collide() {
        let ids = Arc::new(ids());
        let root = SpanContext::root(ids.generate());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| SpanContext::child_of(&root, &ids))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for child in handle.join().unwrap() {
                assert_eq!(child.trace_id(), root.trace_id());
                let n: u32 = child.span_id().strip_prefix("0.").unwrap().parse().unwrap();
                assert!(seen.insert(n), "duplicate child index {n}");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(seen.iter().max(), Some(&2000));
    }

    #[test]
    fn test_depth_limit_rebases() {
        let ids = ids();
        let deep_id = vec!["0"; MAX_SPAN_DEPTH].join(".");
        let mut parent = SpanContext::new("trace-a", deep_id, "parent", true);
        parent.set_sys_baggage_item(LOAD_TEST_KEY, LOAD_TEST_VALUE);

        let child = SpanContext::child_of(&parent, &ids);

        assert_ne!(child.trace_id(), "trace-a");
        assert_eq!(child.span_id(), ROOT_SPAN_ID);
        assert_eq!(child.parent_id(), "");
        assert!(child.is_sampled());
        assert!(child.is_load_test());
    }

    #[test]
    fn test_serialize_layout() {
        let mut ctx = SpanContext::new("t1", "0.1", "0", true);
        ctx.set_baggage_item("k", "v");
        ctx.set_sys_baggage_item("mark", "T");

        assert_eq!(
            ctx.serialize(),
            "tcid=t1&spid=0.1&pspid=0&sample=true&bz:k=v&sy:mark=T&"
        );
    }

    #[test]
    fn test_round_trip_with_reserved_characters() {
        let mut ctx = SpanContext::new("t1", "0.2.7", "0.2", false);
        ctx.set_baggage_item("a=b", "x&y=z%");
        ctx.set_baggage_item("", "empty key");
        ctx.set_sys_baggage_item("bz:fake", "%26");

        let decoded = SpanContext::deserialize(&ctx.serialize()).unwrap();
        assert_eq!(decoded, ctx);
    }

    #[test]
    fn test_deserialize_defaults_and_errors() {
        let ctx = SpanContext::deserialize("tcid=abc&sample=true&").unwrap();
        assert_eq!(ctx.span_id(), ROOT_SPAN_ID);
        assert_eq!(ctx.parent_id(), "");
        assert!(ctx.is_sampled());

        assert!(matches!(
            SpanContext::deserialize("spid=0.1&"),
            Err(CodecError::MissingTraceId)
        ));
        assert!(matches!(
            SpanContext::deserialize("tcid=abc&garbage&"),
            Err(CodecError::Malformed(_))
        ));
    }
}
