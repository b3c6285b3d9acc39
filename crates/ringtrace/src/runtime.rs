//! Assembled runtime: one appender, four rolling categories, stat and flush
//! timers, and a tracer whose reporters feed them.
//!
//! ```text
//!   Tracer ──finish──▶ DigestReporter ──sampled──▶ AsyncAppender ──▶ client-digest.log
//!                           │                          ▲         └─▶ server-digest.log
//!                           └──▶ StatReporter ──tick───┘         └─▶ client-stat.log
//!                                                                └─▶ server-stat.log
//! ```

use crate::appender::{AppendError, AsyncAppender, CategoryRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, TracerConfig};
use crate::reporter::{DigestReporter, JsonDigestEncoder, SpanEncoder};
use crate::rolling::{FlushRegistry, FlushTimer, StoreOptions, FLUSH_INTERVAL};
use crate::sampler::sampler_from_config;
use crate::stat::{StatKeyExtractor, StatReporter, StatTimer, STAT_CYCLE};
use crate::tracer::Tracer;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const CLIENT_DIGEST: &str = "client-digest.log";
pub const SERVER_DIGEST: &str = "server-digest.log";
pub const CLIENT_STAT: &str = "client-stat.log";
pub const SERVER_STAT: &str = "server-stat.log";

/// Startup failures
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Append(#[from] AppendError),
    #[error("failed to start timer thread: {0}")]
    Timer(#[from] io::Error),
}

/// Overrides for [`TracerRuntime::start_with`].
#[derive(Clone)]
pub struct RuntimeOptions {
    pub clock: Arc<dyn Clock>,
    /// Replaces the default stat key for both stat categories
    pub stat_extractor: Option<Arc<dyn StatKeyExtractor>>,
    pub encoder: Arc<dyn SpanEncoder>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            stat_extractor: None,
            encoder: Arc::new(JsonDigestEncoder),
        }
    }
}

pub struct TracerRuntime {
    tracer: Tracer,
    appender: Arc<AsyncAppender>,
    client_stat: Arc<StatReporter>,
    server_stat: Arc<StatReporter>,
    log_dir: PathBuf,
    stat_timer: Option<StatTimer>,
    flush_timer: Option<FlushTimer>,
}

impl TracerRuntime {
    pub fn start(config: &TracerConfig) -> Result<Self, StartError> {
        Self::start_with(config, RuntimeOptions::default())
    }

    pub fn start_with(config: &TracerConfig, options: RuntimeOptions) -> Result<Self, StartError> {
        config.validate()?;
        let store_options = StoreOptions {
            pattern: config.rolling.date_pattern()?,
            retention: config.rolling.retention()?,
            clock: Arc::clone(&options.clock),
        };
        let flush = FlushRegistry::new();
        let registry = CategoryRegistry::new(&config.log_dir, store_options, flush.clone());

        let appender = Arc::new(AsyncAppender::new(config.appender.clone()));
        let encoder = &options.encoder;
        let client_digest = registry.register_rolling(&appender, CLIENT_DIGEST, Arc::clone(encoder))?;
        let server_digest = registry.register_rolling(&appender, SERVER_DIGEST, Arc::clone(encoder))?;
        let client_stat = registry.register_rolling(&appender, CLIENT_STAT, Arc::clone(encoder))?;
        let server_stat = registry.register_rolling(&appender, SERVER_STAT, Arc::clone(encoder))?;
        appender.start()?;

        let stat_reporter = |name: &str, category| {
            let reporter = StatReporter::new(
                name,
                Arc::clone(&appender),
                category,
                Arc::clone(&options.clock),
                config.stat.interval_secs,
            );
            Arc::new(match &options.stat_extractor {
                Some(extractor) => reporter.with_extractor(Arc::clone(extractor)),
                None => reporter,
            })
        };
        let client_stat = stat_reporter("client-stat", client_stat);
        let server_stat = stat_reporter("server-stat", server_stat);

        let stat_timer = StatTimer::start(STAT_CYCLE)?;
        stat_timer.register(&client_stat);
        stat_timer.register(&server_stat);
        let flush_timer = FlushTimer::start(flush, FLUSH_INTERVAL)?;

        let tracer = Tracer::builder(config.app_name.clone())
            .sampler(sampler_from_config(&config.sampler))
            .clock(Arc::clone(&options.clock))
            .host_ip(config.host_ip)
            .client_reporter(Arc::new(
                DigestReporter::new("client-digest", Arc::clone(&appender), client_digest)
                    .with_stat(Arc::clone(&client_stat)),
            ))
            .server_reporter(Arc::new(
                DigestReporter::new("server-digest", Arc::clone(&appender), server_digest)
                    .with_stat(Arc::clone(&server_stat)),
            ))
            .build();

        info!(
            app = %config.app_name,
            dir = %config.log_dir.display(),
            consumers = appender.consumers(),
            capacity = appender.capacity(),
            "tracer runtime started"
        );
        Ok(Self {
            tracer,
            appender,
            client_stat,
            server_stat,
            log_dir: config.log_dir.clone(),
            stat_timer: Some(stat_timer),
            flush_timer: Some(flush_timer),
        })
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn appender(&self) -> &Arc<AsyncAppender> {
        &self.appender
    }

    pub fn client_stat(&self) -> &Arc<StatReporter> {
        &self.client_stat
    }

    pub fn server_stat(&self) -> &Arc<StatReporter> {
        &self.server_stat
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Emit pending stats, drain the appender, then flush every store.
    /// Spans finished afterwards are dropped.
    pub fn shutdown(&mut self) {
        let Some(mut stat_timer) = self.stat_timer.take() else {
            return;
        };
        stat_timer.stop();
        self.appender.shutdown();
        drop(self.flush_timer.take());
        info!(
            published = self.appender.metrics().published(),
            discarded = self.appender.discarded(),
            "tracer runtime stopped"
        );
    }
}

impl Drop for TracerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::span::tags;
    use std::fs;

    #[test]
    fn test_start_writes_digests_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let config = TracerConfig {
            app_name: "orders".into(),
            log_dir: dir.path().to_path_buf(),
            ..TracerConfig::default()
        };
        let options = RuntimeOptions {
            clock: Arc::new(ManualClock::from_millis(1_700_000_000_000)),
            ..RuntimeOptions::default()
        };
        let mut runtime = TracerRuntime::start_with(&config, options).unwrap();

        let tracer = runtime.tracer().clone();
        let mut server = tracer.build_span("handle").start();
        server.set_tag(tags::SPAN_KIND, tags::SERVER);
        let mut client = tracer.build_span("query").as_child_of(server.context()).start();
        client.set_tag(tags::SPAN_KIND, tags::CLIENT);
        client.finish();
        server.finish();
        runtime.shutdown();

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        let client_digest = read(CLIENT_DIGEST);
        let server_digest = read(SERVER_DIGEST);
        assert!(client_digest.contains("\"spanId\":\"0.1\""), "{client_digest}");
        assert!(server_digest.contains("\"operation\":\"handle\""), "{server_digest}");
        assert!(read(CLIENT_STAT).contains("\"method\":\"query\""));
        assert!(read(SERVER_STAT).contains("\"count\":1"));
        assert_eq!(runtime.appender().discarded(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TracerConfig {
            sampler: crate::config::SamplerConfig { percentage: 101 },
            ..TracerConfig::default()
        };
        assert!(matches!(
            TracerRuntime::start(&config),
            Err(StartError::Config(_))
        ));
    }
}
