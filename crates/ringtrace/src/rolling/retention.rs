use super::StoreError;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// How long rotated files are kept: `<N>D<M>H`, `<N>D`, `<M>H` or a plain day
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub days: u32,
    pub hours: u32,
}

impl RetentionPolicy {
    pub const fn days(days: u32) -> Self {
        Self { days, hours: 0 }
    }

    pub fn parse(spec: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidRetention(spec.to_string());
        let spec_upper = spec.trim().to_ascii_uppercase();
        if spec_upper.is_empty() {
            return Err(invalid());
        }
        if spec_upper.bytes().all(|b| b.is_ascii_digit()) {
            return spec_upper.parse().map(Self::days).map_err(|_| invalid());
        }

        let (days, rest) = match spec_upper.split_once('D') {
            Some((d, rest)) => (d.parse::<u32>().map_err(|_| invalid())?, rest),
            None => (0, spec_upper.as_str()),
        };
        let hours = if rest.is_empty() {
            0
        } else {
            rest.strip_suffix('H')
                .and_then(|h| h.parse::<u32>().ok())
                .ok_or_else(invalid)?
        };
        Ok(Self { days, hours })
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days)) + chrono::Duration::hours(i64::from(self.hours))
    }

    /// Rotated files dated before this instant are deleted.
    pub fn cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - self.as_duration()
    }
}

impl FromStr for RetentionPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a rotated-file suffix in either `.yyyy-MM-dd` or `.yyyy-MM-dd_HH`.
pub(crate) fn parse_suffix(suffix: &str) -> Option<NaiveDateTime> {
    let rest = suffix.strip_prefix('.')?;
    let (date, hour) = match rest.split_once('_') {
        Some((date, hour)) if hour.len() == 2 => (date, hour.parse::<u32>().ok()?),
        Some(_) => return None,
        None => (rest, 0),
    };
    if date.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(hour, 0, 0)
}

/// Delete rotated files of `base_name` in `dir` dated before the policy's
/// cutoff. The live file and names that do not parse are left alone.
/// Returns the number of files removed.
pub(crate) fn cleanup(dir: &Path, base_name: &str, policy: &RetentionPolicy, now: NaiveDateTime) -> usize {
    let cutoff = policy.cutoff(now);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "retention scan failed");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(base_name) else { continue };
        let Some(dated) = parse_suffix(suffix) else { continue };
        if dated >= cutoff || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(file = name, "removed expired log file");
                removed += 1;
            }
            Err(err) => warn!(file = name, error = %err, "failed to remove expired log file"),
        }
    }
    removed
}
