//! RingTrace - Distributed Tracing Client Runtime
//!
//! Trace identity, span lifecycle and cross-process context propagation for
//! instrumented services, with an asynchronous pipeline that turns finished
//! spans into time-partitioned digest logs and periodic statistics without
//! blocking or failing the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ finish  ┌────────────────┐ publish ┌──────────────────────┐
//! │ Tracer/Span  │────────▶│ DigestReporter │────────▶│ AsyncAppender        │
//! │ SpanContext  │         │  + StatReporter│         │ (ringcast ring,      │
//! └──────────────┘         └────────────────┘         │  pinned consumers)   │
//!        ▲ extract/inject                             └──────────┬───────────┘
//! ┌──────┴───────┐                                               ▼
//! │ B3 / String /│                                    ┌──────────────────────┐
//! │ Binary codec │                                    │ RollingFileStore     │
//! └──────────────┘                                    │ rotate, retain, flush│
//!                                                     └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use ringtrace::reporter::InMemoryReporter;
//! use ringtrace::span::tags;
//! use ringtrace::Tracer;
//! use std::sync::Arc;
//!
//! let reporter = Arc::new(InMemoryReporter::new());
//! let tracer = Tracer::builder("checkout")
//!     .server_reporter(reporter.clone())
//!     .build();
//!
//! let mut root = tracer.build_span("POST /pay").start();
//! root.set_tag(tags::SPAN_KIND, tags::SERVER);
//! let child = tracer.build_span("load-cart").as_child_of(root.context()).start();
//! assert_eq!(child.context().span_id(), "0.1");
//!
//! root.finish();
//! assert_eq!(reporter.spans().len(), 1);
//! ```

pub mod appender;
pub mod clock;
pub mod config;
pub mod context;
pub mod propagation;
pub mod reporter;
pub mod rolling;
pub mod runtime;
pub mod sampler;
pub mod span;
pub mod stat;
pub mod throttle;
mod timer;
pub mod tracer;

pub use appender::{AppendError, AsyncAppender, CategoryId, EventSink, Payload};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, TracerConfig};
pub use context::{SpanContext, TraceIdGenerator};
pub use propagation::{B3HeaderCodec, BinaryCodec, CodecError, Propagation, StringCodec};
pub use reporter::{DigestReporter, JsonDigestEncoder, Reporter, SpanEncoder};
pub use rolling::{RollingFileStore, StoreError};
pub use runtime::{RuntimeOptions, StartError, TracerRuntime};
pub use sampler::{PercentageSampler, Sampler};
pub use span::{FinishedSpan, Span, SpanKind, TagValue};
pub use stat::{StatAggregator, StatKey, StatReporter};
pub use tracer::{Tracer, TracerBuilder};
