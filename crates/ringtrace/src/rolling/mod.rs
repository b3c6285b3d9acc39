//! Time-partitioned log files.
//!
//! A [`DatePattern`] names rotated files; [`RotationPeriod::probe`] derives
//! the rotation granularity from that pattern alone. [`RollingFileStore`]
//! rotates on the first append past a boundary, [`RetentionPolicy`] bounds how
//! long rotated files live, and [`FlushTimer`] flushes buffered writers.

mod flush;
mod pattern;
mod period;
mod retention;
mod store;

pub use flush::{FlushRegistry, FlushTimer, FLUSH_INTERVAL};
pub use pattern::DatePattern;
pub use period::RotationPeriod;
pub use retention::RetentionPolicy;
pub use store::{RollingFileStore, StoreOptions};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid date pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid retention {0:?}, expected <N>D<M>H or a day count")]
    InvalidRetention(String),
}
