//! Tracer: builds spans, resolves parents and sampling, dispatches finished
//! spans to the client or server reporter.

use crate::clock::{Clock, SystemClock};
use crate::context::{SpanContext, TraceIdGenerator};
use crate::propagation::Propagation;
use crate::reporter::Reporter;
use crate::sampler::{AlwaysSampler, Sampler, SamplingRequest, SamplingStatus};
use crate::span::{FinishedSpan, Reference, ReferenceType, Span, SpanKind, TagValue};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot of dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerMetrics {
    /// Finished spans handed to a reporter
    pub reported: u64,
    /// Finished spans with no reporter for their kind
    pub unreported: u64,
}

struct TracerInner {
    app_name: String,
    sampler: Arc<dyn Sampler>,
    client_reporter: Option<Arc<dyn Reporter>>,
    server_reporter: Option<Arc<dyn Reporter>>,
    clock: Arc<dyn Clock>,
    ids: TraceIdGenerator,
    reported: AtomicU64,
    unreported: AtomicU64,
}

/// Long-lived tracer handle. Cheap to clone; clones share reporters and
/// counters.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    pub fn builder(app_name: impl Into<String>) -> TracerBuilder {
        TracerBuilder::new(app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    pub fn build_span(&self, operation_name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            operation_name: operation_name.into(),
            references: Vec::new(),
            tags: BTreeMap::new(),
            start_millis: None,
        }
    }

    /// Write `ctx` into a carrier. Codec failures are logged, never returned.
    pub fn inject<C, P>(&self, ctx: &SpanContext, codec: &P, carrier: &mut C)
    where
        C: ?Sized,
        P: Propagation<C> + ?Sized,
    {
        if let Err(err) = codec.inject(ctx, carrier) {
            warn!(trace_id = %ctx.trace_id(), error = %err, "failed to inject span context");
        }
    }

    /// Read a context from a carrier, falling back to a fresh root context
    /// sampled by this tracer's policy when the carrier holds none.
    pub fn extract<C, P>(&self, codec: &P, carrier: &C) -> SpanContext
    where
        C: ?Sized,
        P: Propagation<C> + ?Sized,
    {
        match codec.decode(carrier) {
            Ok(ctx) => ctx,
            Err(err) => {
                debug!(error = %err, "no usable context in carrier, starting a new trace");
                let mut ctx = SpanContext::root(self.inner.ids.generate());
                let status = self.sample(ctx.trace_id(), "", &BTreeMap::new());
                ctx.set_sampled(status.sampled);
                ctx
            }
        }
    }

    pub fn metrics(&self) -> TracerMetrics {
        TracerMetrics {
            reported: self.inner.reported.load(Ordering::Relaxed),
            unreported: self.inner.unreported.load(Ordering::Relaxed),
        }
    }

    fn sample(
        &self,
        trace_id: &str,
        operation: &str,
        tags: &BTreeMap<String, TagValue>,
    ) -> SamplingStatus {
        let request = SamplingRequest {
            trace_id,
            operation,
            tags,
        };
        let sampler = &self.inner.sampler;
        panic::catch_unwind(AssertUnwindSafe(|| sampler.sample(&request))).unwrap_or_else(|_| {
            warn!(sampler = sampler.type_name(), trace_id, "sampler panicked, not sampling");
            SamplingStatus::default()
        })
    }

    /// Dispatch a finished span to exactly one reporter, chosen by its kind.
    pub(crate) fn report(&self, span: Arc<FinishedSpan>) {
        let reporter = match span.kind() {
            Some(SpanKind::Client) => self.inner.client_reporter.as_ref(),
            Some(SpanKind::Server) => self.inner.server_reporter.as_ref(),
            None => None,
        };

        let Some(reporter) = reporter else {
            self.inner.unreported.fetch_add(1, Ordering::Relaxed);
            warn!(
                trace_id = %span.context().trace_id(),
                span_id = %span.context().span_id(),
                operation = span.operation_name(),
                kind = ?span.kind(),
                "no reporter for finished span"
            );
            return;
        };

        let trace_id = span.context().trace_id().to_string();
        let span_id = span.context().span_id().to_string();
        match panic::catch_unwind(AssertUnwindSafe(|| reporter.report(span))) {
            Ok(()) => {
                self.inner.reported.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.inner.unreported.fetch_add(1, Ordering::Relaxed);
                warn!(reporter = reporter.name(), %trace_id, %span_id, "reporter panicked");
            }
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("app_name", &self.inner.app_name)
            .field("sampler", &self.inner.sampler.type_name())
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Tracer`]. Defaults: sample everything, system clock,
/// loopback host address, no reporters.
pub struct TracerBuilder {
    app_name: String,
    sampler: Arc<dyn Sampler>,
    client_reporter: Option<Arc<dyn Reporter>>,
    server_reporter: Option<Arc<dyn Reporter>>,
    clock: Arc<dyn Clock>,
    host_ip: Ipv4Addr,
}

impl TracerBuilder {
    fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            sampler: Arc::new(AlwaysSampler),
            client_reporter: None,
            server_reporter: None,
            clock: Arc::new(SystemClock),
            host_ip: Ipv4Addr::LOCALHOST,
        }
    }

    pub fn sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn client_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.client_reporter = Some(reporter);
        self
    }

    pub fn server_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.server_reporter = Some(reporter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Host address embedded in generated trace ids.
    pub fn host_ip(mut self, ip: Ipv4Addr) -> Self {
        self.host_ip = ip;
        self
    }

    pub fn build(self) -> Tracer {
        let ids = TraceIdGenerator::with_clock(self.host_ip, Arc::clone(&self.clock));
        Tracer {
            inner: Arc::new(TracerInner {
                app_name: self.app_name,
                sampler: self.sampler,
                client_reporter: self.client_reporter,
                server_reporter: self.server_reporter,
                clock: self.clock,
                ids,
                reported: AtomicU64::new(0),
                unreported: AtomicU64::new(0),
            }),
        }
    }
}

/// Accumulates parent references and tags for a span about to start.
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    operation_name: String,
    references: Vec<Reference>,
    tags: BTreeMap<String, TagValue>,
    start_millis: Option<u64>,
}

impl SpanBuilder<'_> {
    pub fn as_child_of(self, parent: &SpanContext) -> Self {
        self.add_reference(ReferenceType::ChildOf, parent)
    }

    pub fn follows_from(self, parent: &SpanContext) -> Self {
        self.add_reference(ReferenceType::FollowsFrom, parent)
    }

    pub fn add_reference(mut self, kind: ReferenceType, parent: &SpanContext) -> Self {
        self.references.push(Reference {
            kind,
            context: parent.clone(),
        });
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_start_millis(mut self, start_millis: u64) -> Self {
        self.start_millis = Some(start_millis);
        self
    }

    /// First CHILD_OF reference, else first FOLLOWS_FROM.
    fn preferred_parent(&self) -> Option<&Reference> {
        self.references
            .iter()
            .find(|r| r.kind == ReferenceType::ChildOf)
            .or_else(|| self.references.first())
    }

    pub fn start(self) -> Span {
        let tracer = self.tracer;
        let parent = self.preferred_parent().cloned();
        let mut tags = self.tags;

        let context = match &parent {
            Some(parent) => SpanContext::child_of(&parent.context, &tracer.inner.ids),
            None => {
                let mut ctx = SpanContext::root(tracer.inner.ids.generate());
                let status = tracer.sample(ctx.trace_id(), &self.operation_name, &tags);
                ctx.set_sampled(status.sampled);
                tags.extend(status.tags);
                ctx
            }
        };

        let start_millis = self.start_millis.unwrap_or_else(|| tracer.now_millis());
        Span::new(
            tracer.clone(),
            context,
            self.operation_name,
            start_millis,
            tags,
            parent,
        )
    }
}
