use super::retention::{self, RetentionPolicy};
use super::{DatePattern, RotationPeriod, StoreError};
use crate::clock::Clock;
use crate::throttle::{IntervalThrottle, Throttle};
use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

const WRITE_BUFFER_BYTES: usize = 8 * 1024;
const ROLLOVER_WAIT_STEP: Duration = Duration::from_millis(1);
const ROLLOVER_WAIT_STEPS: u32 = 200;
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Rotation and retention settings shared by every store of a registry.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub pattern: DatePattern,
    pub retention: RetentionPolicy,
    pub clock: Arc<dyn Clock>,
}

/// A buffered log file rotated at the boundaries of its date pattern.
///
/// The live file is always `<dir>/<name>`; each rollover renames it to
/// `<dir>/<name><suffix>` where the suffix formats the period that just ended,
/// then reopens `<name>` and deletes rotated files past retention.
///
/// Writes and flushes never fail outward: errors drop the data and are logged
/// at most once per interval.
pub struct RollingFileStore {
    dir: PathBuf,
    name: String,
    path: PathBuf,
    options: StoreOptions,
    period: Option<RotationPeriod>,
    writer: Mutex<Option<BufWriter<File>>>,
    /// Suffix of the period the live file belongs to
    scheduled_suffix: Mutex<String>,
    /// Next rotation boundary, local wall-clock millis; `i64::MAX` when never
    next_rollover: AtomicI64,
    rolling: AtomicBool,
    failure_throttle: IntervalThrottle,
}

fn as_millis(at: NaiveDateTime) -> i64 {
    at.and_utc().timestamp_millis()
}

fn open_append(path: &Path) -> Result<BufWriter<File>, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|file| BufWriter::with_capacity(WRITE_BUFFER_BYTES, file))
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

impl RollingFileStore {
    /// Open (or create) `<dir>/<name>` for appending.
    ///
    /// An existing live file is attributed to the period of its last
    /// modification, so a file left over from an earlier period is rotated
    /// on the first append.
    pub fn open(dir: impl AsRef<Path>, name: &str, options: StoreOptions) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(name);

        let now = options.clock.now();
        let opened_at = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(|mtime| DateTime::<Local>::from(mtime).naive_local())
            .ok()
            .filter(|mtime| *mtime < now)
            .unwrap_or(now);

        let writer = open_append(&path)?;
        let period = RotationPeriod::probe(&options.pattern);
        let next_rollover = period.map_or(i64::MAX, |p| as_millis(p.next_boundary(opened_at)));
        let scheduled_suffix = options.pattern.format(&opened_at);

        Ok(Self {
            dir,
            name: name.to_string(),
            path,
            options,
            period,
            writer: Mutex::new(Some(writer)),
            scheduled_suffix: Mutex::new(scheduled_suffix),
            next_rollover: AtomicI64::new(next_rollover),
            rolling: AtomicBool::new(false),
            failure_throttle: IntervalThrottle::new(FAILURE_LOG_INTERVAL),
        })
    }

    /// Open a sibling store at `<dir>/shadow/<name>` with the same options.
    pub fn open_shadow(&self) -> Result<Self, StoreError> {
        Self::open(self.dir.join("shadow"), &self.name, self.options.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn period(&self) -> Option<RotationPeriod> {
        self.period
    }

    /// Append one line, rotating first if a boundary has passed.
    pub fn append(&self, line: &str) {
        let now = self.options.clock.now();
        if as_millis(now) >= self.next_rollover.load(Ordering::Acquire) {
            self.roll_over_at(now);
        }
        self.wait_for_rollover();

        let mut writer = self.writer.lock();
        let Some(out) = writer.as_mut() else {
            self.report_failure("write", &io::Error::new(io::ErrorKind::NotConnected, "no open file"));
            return;
        };
        let result = out.write_all(line.as_bytes()).and_then(|()| {
            if line.ends_with('\n') {
                Ok(())
            } else {
                out.write_all(b"\n")
            }
        });
        if let Err(err) = result {
            self.report_failure("write", &err);
        }
    }

    pub fn flush(&self) {
        let mut writer = self.writer.lock();
        if let Some(out) = writer.as_mut() {
            if let Err(err) = out.flush() {
                self.report_failure("flush", &err);
            }
        }
    }

    /// Rotate now regardless of the boundary.
    pub fn roll_over(&self) {
        let now = self.options.clock.now();
        self.next_rollover.store(i64::MIN, Ordering::Release);
        self.roll_over_at(now);
    }

    /// Delete rotated files past retention. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        retention::cleanup(
            &self.dir,
            &self.name,
            &self.options.retention,
            self.options.clock.now(),
        )
    }

    fn wait_for_rollover(&self) {
        for _ in 0..ROLLOVER_WAIT_STEPS {
            if !self.rolling.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(ROLLOVER_WAIT_STEP);
        }
    }

    fn roll_over_at(&self, now: NaiveDateTime) {
        if self
            .rolling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Another appender may have finished this rollover before we got the flag
        let due = as_millis(now) >= self.next_rollover.load(Ordering::Acquire);
        if due {
            self.rotate(now);
        }
        self.rolling.store(false, Ordering::Release);
        if due {
            self.cleanup();
        }
    }

    fn rotate(&self, now: NaiveDateTime) {
        let mut writer = self.writer.lock();
        if let Some(out) = writer.as_mut() {
            if let Err(err) = out.flush() {
                self.report_failure("flush", &err);
            }
        }

        let mut scheduled = self.scheduled_suffix.lock();
        let target = self.dir.join(format!("{}{}", self.name, scheduled));
        if target != self.path {
            if target.exists() {
                if let Err(err) = fs::remove_file(&target) {
                    warn!(file = %target.display(), error = %err, "failed to remove existing rotation target");
                }
            }
            match fs::rename(&self.path, &target) {
                Ok(()) => match open_append(&self.path) {
                    Ok(fresh) => {
                        *writer = Some(fresh);
                        info!(file = %target.display(), "rolled over log file");
                    }
                    Err(err) => {
                        error!(file = %self.path.display(), error = %err, "failed to reopen log file after rollover");
                        *writer = None;
                    }
                },
                Err(err) => {
                    error!(
                        from = %self.path.display(),
                        to = %target.display(),
                        error = %err,
                        "failed to rename log file, keeping current file"
                    );
                }
            }
        }

        *scheduled = self.options.pattern.format(&now);
        let next = self
            .period
            .map_or(i64::MAX, |p| as_millis(p.next_boundary(now)));
        self.next_rollover.store(next, Ordering::Release);
    }

    fn report_failure(&self, op: &str, err: &io::Error) {
        if let Some(suppressed) = self.failure_throttle.try_acquire() {
            error!(
                file = %self.path.display(),
                op,
                error = %err,
                suppressed,
                "log file operation failed, data dropped"
            );
        }
    }
}

impl fmt::Debug for RollingFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingFileStore")
            .field("path", &self.path)
            .field("pattern", &self.options.pattern.source())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl Drop for RollingFileStore {
    fn drop(&mut self) {
        self.flush();
    }
}
