//! Runtime configuration.
//!
//! Every field has a default. Settings load either from the flat
//! `ringtrace.*` property surface ([`TracerConfig::from_properties`]) or from
//! JSON ([`TracerConfig::from_json`]); both paths validate the result.

use crate::rolling::{DatePattern, RetentionPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const APP_NAME: &str = "ringtrace.app.name";
pub const LOG_DIR: &str = "ringtrace.log.dir";
pub const ROLLING_PATTERN: &str = "ringtrace.log.rolling.pattern";
pub const LOG_RESERVE: &str = "ringtrace.log.reserve";
pub const BUFFER_SIZE: &str = "ringtrace.appender.buffer.size";
pub const CONSUMERS: &str = "ringtrace.appender.consumers";
pub const DISCARD: &str = "ringtrace.appender.discard";
pub const DISCARD_THRESHOLD: &str = "ringtrace.appender.discard.threshold";
pub const DISCARD_LOG_IDS: &str = "ringtrace.appender.discard.log_ids";
pub const STAT_INTERVAL: &str = "ringtrace.stat.interval";
pub const SAMPLER_PERCENTAGE: &str = "ringtrace.sampler.percentage";
pub const HOST_IP: &str = "ringtrace.host.ip";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key has a value that does not parse or is out of range
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    /// JSON document could not be deserialized
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// File naming and retention
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// Date pattern of rotated-file suffixes
    pub pattern: String,
    /// Retention, `<N>D<M>H` or a plain day count
    pub reserve: String,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            pattern: "'.'yyyy-MM-dd".to_string(),
            reserve: "7".to_string(),
        }
    }
}

impl RollingConfig {
    pub fn date_pattern(&self) -> Result<DatePattern, ConfigError> {
        DatePattern::parse(&self.pattern).map_err(|_| ConfigError::invalid(ROLLING_PATTERN, &self.pattern))
    }

    pub fn retention(&self) -> Result<RetentionPolicy, ConfigError> {
        RetentionPolicy::parse(&self.reserve).map_err(|_| ConfigError::invalid(LOG_RESERVE, &self.reserve))
    }
}

/// Appender pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    /// Ring capacity, rounded up to a power of two
    pub buffer_size: usize,
    /// Consumer thread count
    pub consumers: usize,
    /// Drop events when the ring is full instead of blocking the producer
    pub discard: bool,
    /// Discards counted between two discard warnings
    pub discard_threshold: u64,
    /// Log trace/span ids of discarded events, throttled
    pub log_discarded_ids: bool,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            consumers: 3,
            discard: true,
            discard_threshold: 500,
            log_discarded_ids: false,
        }
    }
}

/// Statistics emission
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatConfig {
    /// Seconds between stat emissions
    pub interval_secs: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Root sampling
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Percentage of root traces sampled, 0..=100
    pub percentage: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { percentage: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Reported as the `local.app` dimension
    pub app_name: String,
    /// Directory of every log category
    pub log_dir: PathBuf,
    /// Embedded in generated trace ids
    pub host_ip: Ipv4Addr,
    pub rolling: RollingConfig,
    pub appender: AppenderConfig,
    pub stat: StatConfig,
    pub sampler: SamplerConfig,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            app_name: "unknown".to_string(),
            log_dir: PathBuf::from("./logs"),
            host_ip: Ipv4Addr::LOCALHOST,
            rolling: RollingConfig::default(),
            appender: AppenderConfig::default(),
            stat: StatConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::invalid(key, value))
}

impl TracerConfig {
    /// Build from `ringtrace.*` string properties. Unknown keys are ignored.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, value) in props {
            match key.as_str() {
                APP_NAME => config.app_name = value.trim().to_string(),
                LOG_DIR => config.log_dir = PathBuf::from(value.trim()),
                ROLLING_PATTERN => config.rolling.pattern = value.clone(),
                LOG_RESERVE => config.rolling.reserve = value.clone(),
                BUFFER_SIZE => config.appender.buffer_size = parse(key, value)?,
                CONSUMERS => config.appender.consumers = parse(key, value)?,
                DISCARD => config.appender.discard = parse(key, value)?,
                DISCARD_THRESHOLD => config.appender.discard_threshold = parse(key, value)?,
                DISCARD_LOG_IDS => config.appender.log_discarded_ids = parse(key, value)?,
                STAT_INTERVAL => config.stat.interval_secs = parse(key, value)?,
                SAMPLER_PERCENTAGE => config.sampler.percentage = parse(key, value)?,
                HOST_IP => config.host_ip = parse(key, value)?,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rolling.date_pattern()?;
        self.rolling.retention()?;
        if self.app_name.is_empty() {
            return Err(ConfigError::invalid(APP_NAME, &self.app_name));
        }
        if self.appender.buffer_size == 0 {
            return Err(ConfigError::invalid(BUFFER_SIZE, self.appender.buffer_size));
        }
        if self.appender.consumers == 0 {
            return Err(ConfigError::invalid(CONSUMERS, self.appender.consumers));
        }
        if self.appender.discard_threshold == 0 {
            return Err(ConfigError::invalid(DISCARD_THRESHOLD, self.appender.discard_threshold));
        }
        if self.stat.interval_secs == 0 {
            return Err(ConfigError::invalid(STAT_INTERVAL, self.stat.interval_secs));
        }
        if self.sampler.percentage > 100 {
            return Err(ConfigError::invalid(SAMPLER_PERCENTAGE, self.sampler.percentage));
        }
        Ok(())
    }
}
