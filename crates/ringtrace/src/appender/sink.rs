use super::{AppendError, Payload};
use crate::reporter::SpanEncoder;
use crate::rolling::{FlushRegistry, RollingFileStore};
use std::borrow::Cow;
use std::sync::Arc;

/// Destination of one log category, owned by exactly one consumer thread.
pub trait EventSink: Send {
    fn append(&mut self, payload: &Payload) -> Result<(), AppendError>;

    fn flush(&mut self) -> Result<(), AppendError> {
        Ok(())
    }
}

/// Writes encoded spans and stat lines into a rolling file.
///
/// Load-test payloads go to a shadow store at `<dir>/shadow/<name>`, opened on
/// first use.
pub struct RollingSink {
    store: Arc<RollingFileStore>,
    shadow: Option<Arc<RollingFileStore>>,
    encoder: Arc<dyn SpanEncoder>,
    flush_registry: Option<FlushRegistry>,
}

impl RollingSink {
    pub fn new(store: Arc<RollingFileStore>, encoder: Arc<dyn SpanEncoder>) -> Self {
        Self {
            store,
            shadow: None,
            encoder,
            flush_registry: None,
        }
    }

    /// Register the lazily opened shadow store with a flush timer.
    pub fn with_flush_registry(mut self, registry: FlushRegistry) -> Self {
        self.flush_registry = Some(registry);
        self
    }

    pub fn store(&self) -> &Arc<RollingFileStore> {
        &self.store
    }

    fn shadow_store(&mut self) -> Result<Arc<RollingFileStore>, AppendError> {
        if let Some(shadow) = &self.shadow {
            return Ok(Arc::clone(shadow));
        }
        let shadow = Arc::new(self.store.open_shadow()?);
        if let Some(registry) = &self.flush_registry {
            registry.register(&shadow);
        }
        self.shadow = Some(Arc::clone(&shadow));
        Ok(shadow)
    }
}

impl EventSink for RollingSink {
    fn append(&mut self, payload: &Payload) -> Result<(), AppendError> {
        let text: Cow<'_, str> = match payload {
            Payload::Span(span) => Cow::Owned(self.encoder.encode(span)),
            Payload::Line { text, .. } => Cow::Borrowed(text),
        };
        if payload.is_shadow() {
            self.shadow_store()?.append(&text);
        } else {
            self.store.append(&text);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AppendError> {
        self.store.flush();
        if let Some(shadow) = &self.shadow {
            shadow.flush();
        }
        Ok(())
    }
}
