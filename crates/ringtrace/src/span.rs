//! Span model: live spans owned by the call path and the immutable record
//! produced when they finish.

use crate::context::SpanContext;
use crate::tracer::Tracer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Reserved tag names.
pub mod tags {
    /// Role of the span: [`CLIENT`] or [`SERVER`]. Selects the reporter.
    pub const SPAN_KIND: &str = "span.kind";
    pub const CLIENT: &str = "client";
    pub const SERVER: &str = "server";
    /// `true` when the operation failed.
    pub const ERROR: &str = "error";
    /// Explicit result code, overrides the error flag in digests and stats.
    pub const RESULT_CODE: &str = "result.code";
    /// Method dimension used by the default stat key.
    pub const METHOD: &str = "method";
}

/// Tag value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(s) => f.write_str(s),
            TagValue::Int(i) => write!(f, "{i}"),
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::Int(v.into())
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

/// Span role, taken from the [`tags::SPAN_KIND`] tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Client,
    Server,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => tags::CLIENT,
            SpanKind::Server => tags::SERVER,
        }
    }
}

/// Relationship to a parent span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    ChildOf,
    FollowsFrom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceType,
    pub context: SpanContext,
}

/// Timestamped structured log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp_millis: u64,
    pub fields: BTreeMap<String, String>,
}

/// A live span. Finishing consumes it, so a span reports at most once.
pub struct Span {
    tracer: Tracer,
    context: SpanContext,
    operation_name: String,
    start_millis: u64,
    tags: BTreeMap<String, TagValue>,
    logs: Vec<LogRecord>,
    parent: Option<Reference>,
}

impl Span {
    pub(crate) fn new(
        tracer: Tracer,
        context: SpanContext,
        operation_name: String,
        start_millis: u64,
        tags: BTreeMap<String, TagValue>,
        parent: Option<Reference>,
    ) -> Self {
        Self {
            tracer,
            context,
            operation_name,
            start_millis,
            tags,
            logs: Vec::new(),
            parent,
        }
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn set_operation_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.operation_name = name.into();
        self
    }

    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) -> &mut Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// Append a log entry stamped with the tracer's clock.
    pub fn log<I, K, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let now = self.tracer.now_millis();
        self.log_at(now, fields)
    }

    pub fn log_at<I, K, V>(&mut self, timestamp_millis: u64, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.logs.push(LogRecord {
            timestamp_millis,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    /// Shorthand for a log entry with a single `event` field.
    pub fn log_event(&mut self, event: impl Into<String>) -> &mut Self {
        self.log([("event", event.into())])
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn set_baggage_item(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.context.set_baggage_item(key, value);
        self
    }

    pub fn set_sys_baggage_item(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.context.set_sys_baggage_item(key, value);
        self
    }

    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.context.baggage_item(key)
    }

    /// Finish now and hand the record to the tracer's reporter for its kind.
    pub fn finish(self) -> Arc<FinishedSpan> {
        let now = self.tracer.now_millis();
        self.finish_at(now)
    }

    pub fn finish_at(self, end_millis: u64) -> Arc<FinishedSpan> {
        let tracer = self.tracer;
        let finished = Arc::new(FinishedSpan {
            app_name: tracer.app_name().to_string(),
            context: self.context,
            operation_name: self.operation_name,
            start_millis: self.start_millis,
            end_millis: end_millis.max(self.start_millis),
            tags: self.tags,
            logs: self.logs,
            parent: self.parent,
        });
        tracer.report(Arc::clone(&finished));
        finished
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("context", &self.context)
            .field("operation_name", &self.operation_name)
            .field("start_millis", &self.start_millis)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Immutable record of a finished span
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    app_name: String,
    context: SpanContext,
    operation_name: String,
    start_millis: u64,
    end_millis: u64,
    tags: BTreeMap<String, TagValue>,
    logs: Vec<LogRecord>,
    parent: Option<Reference>,
}

impl FinishedSpan {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    pub fn end_millis(&self) -> u64 {
        self.end_millis
    }

    pub fn duration_millis(&self) -> u64 {
        self.end_millis - self.start_millis
    }

    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    pub fn parent(&self) -> Option<&Reference> {
        self.parent.as_ref()
    }

    pub fn kind(&self) -> Option<SpanKind> {
        match self.tags.get(tags::SPAN_KIND) {
            Some(TagValue::String(kind)) if kind == tags::CLIENT => Some(SpanKind::Client),
            Some(TagValue::String(kind)) if kind == tags::SERVER => Some(SpanKind::Server),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        match self.tags.get(tags::ERROR) {
            Some(TagValue::Bool(b)) => *b,
            Some(TagValue::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Explicit result code tag, else `"error"` or `"success"`.
    pub fn result_code(&self) -> String {
        match self.tags.get(tags::RESULT_CODE) {
            Some(code) => code.to_string(),
            None if self.is_error() => "error".to_string(),
            None => "success".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::reporter::InMemoryReporter;
    use std::time::Duration;

    fn tracer(clock: Arc<ManualClock>, reporter: Arc<InMemoryReporter>) -> Tracer {
        Tracer::builder("span-tests")
            .clock(clock)
            .client_reporter(reporter.clone())
            .server_reporter(reporter)
            .build()
    }

    #[test]
    fn test_finish_records_timing_and_tags() {
        let clock = Arc::new(ManualClock::from_millis(10_000));
        let reporter = Arc::new(InMemoryReporter::new());
        let tracer = tracer(clock.clone(), reporter.clone());

        let mut span = tracer.build_span("GET /users").start();
        span.set_tag(tags::SPAN_KIND, tags::SERVER)
            .set_tag("http.status", 200)
            .set_tag("cache.hit", false)
            .set_tag("ratio", 0.5);
        clock.advance(Duration::from_millis(5));
        span.log_event("parsed");
        clock.advance(Duration::from_millis(20));

        let finished = span.finish();

        assert_eq!(finished.start_millis(), 10_000);
        assert_eq!(finished.duration_millis(), 25);
        assert_eq!(finished.kind(), Some(SpanKind::Server));
        assert_eq!(finished.tag("http.status"), Some(&TagValue::Int(200)));
        assert_eq!(finished.logs().len(), 1);
        assert_eq!(finished.logs()[0].timestamp_millis, 10_005);
        assert_eq!(finished.logs()[0].fields["event"], "parsed");
        assert_eq!(finished.app_name(), "span-tests");
        assert_eq!(reporter.spans().len(), 1);
    }

    #[test]
    fn test_finish_at_never_precedes_start() {
        let clock = Arc::new(ManualClock::from_millis(5_000));
        let reporter = Arc::new(InMemoryReporter::new());
        let tracer = tracer(clock, reporter);

        let finished = tracer.build_span("op").start().finish_at(1_000);
        assert_eq!(finished.duration_millis(), 0);
    }

    #[test]
    fn test_result_code() {
        let clock = Arc::new(ManualClock::from_millis(0));
        let reporter = Arc::new(InMemoryReporter::new());
        let tracer = tracer(clock, reporter);

        let ok = tracer.build_span("a").start().finish();
        assert_eq!(ok.result_code(), "success");

        let mut failed = tracer.build_span("b").start();
        failed.set_tag(tags::ERROR, true);
        assert_eq!(failed.finish().result_code(), "error");

        let mut coded = tracer.build_span("c").start();
        coded.set_tag(tags::ERROR, true).set_tag(tags::RESULT_CODE, "02");
        assert_eq!(coded.finish().result_code(), "02");
    }

    #[test]
    fn test_tag_value_json() {
        assert_eq!(serde_json::to_string(&TagValue::from("x")).unwrap(), "\"x\"");
        assert_eq!(serde_json::to_string(&TagValue::from(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&TagValue::from(true)).unwrap(), "true");
    }
}
