use ringtrace::clock::ManualClock;
use ringtrace::propagation::{B3HeaderCodec, BinaryCodec, StringCodec};
use ringtrace::runtime::{RuntimeOptions, CLIENT_DIGEST, SERVER_DIGEST, SERVER_STAT};
use ringtrace::span::tags;
use ringtrace::stat::{StatKey, StatKeyExtractor, APP_DIM};
use ringtrace::{FinishedSpan, TracerConfig, TracerRuntime};
use serde_json::Value;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Keys stats by application only.
struct ByApp;

impl StatKeyExtractor for ByApp {
    fn extract(&self, span: &FinishedSpan) -> Option<StatKey> {
        Some(StatKey::new("all").with_dim(APP_DIM, span.app_name()))
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn runtime(dir: &std::path::Path, clock: Arc<ManualClock>) -> TracerRuntime {
    init_logging();
    let config = TracerConfig {
        app_name: "gateway".into(),
        log_dir: dir.to_path_buf(),
        ..TracerConfig::default()
    };
    TracerRuntime::start_with(
        &config,
        RuntimeOptions {
            clock,
            stat_extractor: Some(Arc::new(ByApp)),
            ..RuntimeOptions::default()
        },
    )
    .unwrap()
}

fn json_lines(path: &std::path::Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_nested_spans_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::from_millis(1_715_000_000_000));
    let mut runtime = runtime(dir.path(), clock.clone());
    let tracer = runtime.tracer().clone();

    let a = tracer
        .build_span("A")
        .with_tag(tags::SPAN_KIND, tags::SERVER)
        .start();
    assert!(a.context().is_sampled());
    assert_eq!(a.context().span_id(), "0");

    let b = tracer
        .build_span("B")
        .as_child_of(a.context())
        .with_tag(tags::SPAN_KIND, tags::SERVER)
        .start();
    assert_eq!(b.context().span_id(), "0.1");
    assert_eq!(b.context().trace_id(), a.context().trace_id());

    let c = tracer.build_span("C").as_child_of(b.context()).start();
    assert_eq!(c.context().span_id(), "0.1.1");
    drop(c);

    clock.advance(Duration::from_millis(30));
    let b = b.finish();
    clock.advance(Duration::from_millis(20));
    let a = a.finish();

    let key = StatKey::new("all").with_dim(APP_DIM, "gateway");
    assert_eq!(
        runtime.server_stat().aggregator().current_value(&key),
        Some(vec![2, a.duration_millis() + b.duration_millis()])
    );
    assert_eq!(a.duration_millis() + b.duration_millis(), 80);

    runtime.shutdown();

    let digests = json_lines(&dir.path().join(SERVER_DIGEST));
    let ids: Vec<&str> = digests.iter().map(|d| d["spanId"].as_str().unwrap()).collect();
    assert_eq!(ids, ["0.1", "0"]);
    assert!(fs::read_to_string(dir.path().join(CLIENT_DIGEST)).unwrap().is_empty());

    let stats = json_lines(&dir.path().join(SERVER_STAT));
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["count"], 2);
    assert_eq!(stats[0]["total.cost.milliseconds"], 80);
}

#[test]
fn test_context_crosses_process_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime(dir.path(), Arc::new(ManualClock::from_millis(0)));
    let tracer = runtime.tracer();

    let mut outbound = tracer
        .build_span("call")
        .with_tag(tags::SPAN_KIND, tags::CLIENT)
        .start();
    outbound.set_baggage_item("user&id", "a=b%c");
    outbound.set_sys_baggage_item("mark", "T");

    let mut headers: Vec<(String, String)> = Vec::new();
    tracer.inject(outbound.context(), &B3HeaderCodec, &mut headers);
    let mut text = String::new();
    tracer.inject(outbound.context(), &StringCodec, &mut text);
    let mut binary = Cursor::new(b"frame-header".to_vec());
    binary.set_position(12);
    tracer.inject(outbound.context(), &BinaryCodec, &mut binary);

    for received in [
        tracer.extract(&B3HeaderCodec, &headers),
        tracer.extract(&StringCodec, &text),
        tracer.extract(&BinaryCodec, &binary),
    ] {
        assert_eq!(&received, outbound.context());
        assert!(received.is_load_test());

        let inbound = tracer.build_span("serve").as_child_of(&received).start();
        assert_eq!(inbound.context().trace_id(), outbound.context().trace_id());
        assert_eq!(inbound.baggage_item("user&id"), Some("a=b%c"));
    }
}

#[test]
fn test_garbage_carrier_starts_new_trace() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime(dir.path(), Arc::new(ManualClock::from_millis(0)));
    let tracer = runtime.tracer();

    let headers = vec![("X-B3-SpanId".to_string(), "0.4".to_string())];
    let ctx = tracer.extract(&B3HeaderCodec, &headers);
    assert_eq!(ctx.span_id(), "0");
    assert!(ctx.is_sampled());
    assert!(!ctx.trace_id().is_empty());

    let ctx = tracer.extract(&BinaryCodec, &Cursor::new(vec![1, 2, 3]));
    assert_eq!(ctx.parent_id(), "");
}
