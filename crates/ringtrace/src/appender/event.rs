use crate::span::FinishedSpan;
use std::fmt;
use std::sync::Arc;

/// Handle of a registered log category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(pub(crate) usize);

impl CategoryId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a consumer writes: a finished span, encoded by the sink, or a line
/// formatted by the producer.
#[derive(Debug, Clone)]
pub enum Payload {
    Span(Arc<FinishedSpan>),
    Line { text: String, shadow: bool },
}

impl Payload {
    pub fn line(text: impl Into<String>) -> Self {
        Payload::Line {
            text: text.into(),
            shadow: false,
        }
    }

    /// Load-test traffic, routed to the shadow store.
    pub fn is_shadow(&self) -> bool {
        match self {
            Payload::Span(span) => span.context().is_load_test(),
            Payload::Line { shadow, .. } => *shadow,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Payload::Span(span) => Some(span.context().trace_id()),
            Payload::Line { .. } => None,
        }
    }

    pub fn span_id(&self) -> Option<&str> {
        match self {
            Payload::Span(span) => Some(span.context().span_id()),
            Payload::Line { .. } => None,
        }
    }
}

/// Ring slot content.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub category: CategoryId,
    pub payload: Payload,
}
