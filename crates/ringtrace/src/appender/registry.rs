use super::{AppendError, AsyncAppender, CategoryId, RollingSink};
use crate::reporter::SpanEncoder;
use crate::rolling::{FlushRegistry, RollingFileStore, StoreError, StoreOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opens rolling stores in one directory with shared options and registers
/// them as appender categories.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    dir: PathBuf,
    options: StoreOptions,
    flush: FlushRegistry,
}

impl CategoryRegistry {
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions, flush: FlushRegistry) -> Self {
        Self {
            dir: dir.into(),
            options,
            flush,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn flush_registry(&self) -> &FlushRegistry {
        &self.flush
    }

    /// Open `<dir>/<name>` and register it for periodic flushing.
    pub fn open_store(&self, name: &str) -> Result<Arc<RollingFileStore>, StoreError> {
        let store = Arc::new(RollingFileStore::open(&self.dir, name, self.options.clone())?);
        self.flush.register(&store);
        Ok(store)
    }

    /// Open a store and register a [`RollingSink`] for it with `appender`.
    pub fn register_rolling(
        &self,
        appender: &AsyncAppender,
        name: &str,
        encoder: Arc<dyn SpanEncoder>,
    ) -> Result<CategoryId, AppendError> {
        let store = self.open_store(name)?;
        let sink = RollingSink::new(store, encoder).with_flush_registry(self.flush.clone());
        appender.register(name, Box::new(sink))
    }
}
