//! Finished-span reporters and digest encoding.

use crate::appender::{AppendError, AsyncAppender, CategoryId, Payload};
use crate::span::{FinishedSpan, SpanKind};
use crate::stat::StatReporter;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Receives every finished span of one kind from the tracer.
pub trait Reporter: Send + Sync {
    fn report(&self, span: Arc<FinishedSpan>);

    fn name(&self) -> &str;
}

/// Turns a finished span into one log line, without the trailing newline.
pub trait SpanEncoder: Send + Sync {
    fn encode(&self, span: &FinishedSpan) -> String;
}

/// One JSON object per span.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDigestEncoder;

impl SpanEncoder for JsonDigestEncoder {
    fn encode(&self, span: &FinishedSpan) -> String {
        let ctx = span.context();
        let time = DateTime::from_timestamp_millis(span.start_millis() as i64)
            .map(|t| {
                t.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S%.3f")
                    .to_string()
            })
            .unwrap_or_default();
        json!({
            "time": time,
            "local.app": span.app_name(),
            "traceId": ctx.trace_id(),
            "spanId": ctx.span_id(),
            "parentSpanId": ctx.parent_id(),
            "span.kind": span.kind().map(|k| k.as_str()).unwrap_or(""),
            "operation": span.operation_name(),
            "result.code": span.result_code(),
            "time.cost.milliseconds": span.duration_millis(),
            "tags": span.tags(),
            "logs": span.logs(),
            "sys.baggage": ctx.sys_baggage(),
            "biz.baggage": ctx.biz_baggage(),
        })
        .to_string()
    }
}

/// Publishes sampled spans to a digest category and folds every span into an
/// optional stat reporter.
pub struct DigestReporter {
    name: String,
    appender: Arc<AsyncAppender>,
    category: CategoryId,
    stat: Option<Arc<StatReporter>>,
}

impl DigestReporter {
    pub fn new(name: impl Into<String>, appender: Arc<AsyncAppender>, category: CategoryId) -> Self {
        Self {
            name: name.into(),
            appender,
            category,
            stat: None,
        }
    }

    pub fn with_stat(mut self, stat: Arc<StatReporter>) -> Self {
        self.stat = Some(stat);
        self
    }

    pub fn stat(&self) -> Option<&Arc<StatReporter>> {
        self.stat.as_ref()
    }
}

impl Reporter for DigestReporter {
    fn report(&self, span: Arc<FinishedSpan>) {
        if let Some(stat) = &self.stat {
            stat.report_span(&span);
        }
        if !span.context().is_sampled() {
            return;
        }
        match self.appender.publish(self.category, Payload::Span(span)) {
            // Discards are counted by the appender
            Ok(()) | Err(AppendError::Rejected) => {}
            Err(err) => debug!(reporter = %self.name, error = %err, "digest not published"),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DigestReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestReporter")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("stat", &self.stat.is_some())
            .finish()
    }
}

/// Hands each span to every inner reporter in order.
pub struct CompositeReporter {
    name: String,
    reporters: Vec<Arc<dyn Reporter>>,
}

impl CompositeReporter {
    pub fn new(name: impl Into<String>, reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self {
            name: name.into(),
            reporters,
        }
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

impl Reporter for CompositeReporter {
    fn report(&self, span: Arc<FinishedSpan>) {
        for reporter in &self.reporters {
            reporter.report(Arc::clone(&span));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _span: Arc<FinishedSpan>) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Keeps finished spans in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryReporter {
    spans: Mutex<Vec<Arc<FinishedSpan>>>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<Arc<FinishedSpan>> {
        self.spans.lock().clone()
    }

    /// Spans of the given kind, in report order.
    pub fn spans_of(&self, kind: SpanKind) -> Vec<Arc<FinishedSpan>> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.kind() == Some(kind))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Reporter for InMemoryReporter {
    fn report(&self, span: Arc<FinishedSpan>) {
        self.spans.lock().push(span);
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
