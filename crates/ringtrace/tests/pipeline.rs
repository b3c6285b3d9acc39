use ringtrace::appender::{AppendError, AsyncAppender, CategoryRegistry, EventSink, Payload};
use ringtrace::clock::ManualClock;
use ringtrace::config::AppenderConfig;
use ringtrace::reporter::JsonDigestEncoder;
use ringtrace::rolling::{DatePattern, FlushRegistry, RetentionPolicy, StoreOptions};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread;

const PRODUCERS: usize = 6;
const PER_PRODUCER: usize = 3_000;
const CATEGORIES: usize = 4;

fn registry(dir: &std::path::Path) -> CategoryRegistry {
    let options = StoreOptions {
        pattern: DatePattern::parse("'.'yyyy-MM-dd").unwrap(),
        retention: RetentionPolicy::days(3),
        clock: Arc::new(ManualClock::from_millis(1_715_000_000_000)),
    };
    CategoryRegistry::new(dir, options, FlushRegistry::new())
}

#[test]
fn test_blocking_pipeline_writes_every_line_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let appender = Arc::new(AsyncAppender::new(AppenderConfig {
        buffer_size: 64,
        consumers: 3,
        discard: false,
        ..AppenderConfig::default()
    }));
    let categories: Vec<_> = (0..CATEGORIES)
        .map(|i| {
            registry
                .register_rolling(&appender, &format!("cat-{i}.log"), Arc::new(JsonDigestEncoder))
                .unwrap()
        })
        .collect();
    appender.start().unwrap();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let appender = Arc::clone(&appender);
            let categories = categories.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let category = categories[(producer + seq) % CATEGORIES];
                    appender
                        .publish(category, Payload::line(format!("{producer} {seq}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    appender.shutdown();

    let mut total = 0;
    for i in 0..CATEGORIES {
        let content = fs::read_to_string(dir.path().join(format!("cat-{i}.log"))).unwrap();
        let mut last: HashMap<usize, usize> = HashMap::new();
        for line in content.lines() {
            let (producer, seq) = line.split_once(' ').unwrap();
            let (producer, seq): (usize, usize) = (producer.parse().unwrap(), seq.parse().unwrap());
            assert_eq!((producer + seq) % CATEGORIES, i, "line {line} in wrong category");
            if let Some(prev) = last.insert(producer, seq) {
                assert!(prev < seq, "producer {producer}: {seq} after {prev}");
            }
            total += 1;
        }
    }
    assert_eq!(total, PRODUCERS * PER_PRODUCER);
    assert_eq!(appender.discarded(), 0);
    assert_eq!(appender.metrics().delivered(), (PRODUCERS * PER_PRODUCER) as u64);
}

/// Never finishes an append until the test is over.
struct StuckSink(std::sync::mpsc::Receiver<()>);

impl EventSink for StuckSink {
    fn append(&mut self, _payload: &Payload) -> Result<(), AppendError> {
        let _ = self.0.recv();
        Ok(())
    }
}

#[test]
fn test_discard_mode_never_blocks_producers() {
    let appender = Arc::new(AsyncAppender::new(AppenderConfig {
        buffer_size: 16,
        consumers: 1,
        discard: true,
        discard_threshold: 10,
        log_discarded_ids: false,
    }));
    let (release, gate) = std::sync::mpsc::channel();
    let category = appender.register("stuck", Box::new(StuckSink(gate))).unwrap();
    appender.start().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let appender = Arc::clone(&appender);
            thread::spawn(move || {
                let mut rejected = 0u64;
                for i in 0..1_000 {
                    if let Err(AppendError::Rejected) =
                        appender.publish(category, Payload::line(i.to_string()))
                    {
                        rejected += 1;
                    }
                }
                rejected
            })
        })
        .collect();
    let rejected: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(rejected, appender.discarded());
    assert_eq!(appender.metrics().published() + rejected, 4_000);
    assert!(appender.metrics().published() <= 16);

    drop(release);
    appender.shutdown();
}
