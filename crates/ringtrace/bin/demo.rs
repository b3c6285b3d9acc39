//! # Tracing Runtime Demo
//!
//! Several producer threads play a front service calling a back service:
//! each request opens a server span, a client span for the outbound call,
//! carries the context across in B3 headers, and finishes both. The runtime
//! writes digests and per-second stats under the log directory.
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (4 producers, 50 requests each)
//! cargo run -p ringtrace --bin demo -- --quick
//!
//! # Full mode, custom directory, debug logs from the runtime
//! RUST_LOG=ringtrace=debug cargo run -p ringtrace --bin demo -- --dir /tmp/ringtrace
//! ```

use ringtrace::propagation::B3HeaderCodec;
use ringtrace::span::tags;
use ringtrace::{TracerConfig, TracerRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let dir = args
        .iter()
        .position(|a| a == "--dir")
        .and_then(|i| args.get(i + 1))
        .map_or_else(|| PathBuf::from("./demo-logs"), PathBuf::from);

    let (producers, requests) = if quick { (4, 50) } else { (8, 500) };

    let config = TracerConfig {
        app_name: "demo-front".into(),
        log_dir: dir.clone(),
        stat: ringtrace::config::StatConfig { interval_secs: 1 },
        ..TracerConfig::default()
    };

    println!("Demo configuration:");
    println!("   Mode: {}", if quick { "quick" } else { "full" });
    println!("   Producers: {producers}");
    println!("   Requests per producer: {requests}");
    println!("   Log directory: {}", dir.display());
    println!();

    let mut runtime = TracerRuntime::start(&config)?;
    let tracer = runtime.tracer().clone();
    let started = Instant::now();

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let tracer = tracer.clone();
            let codec = B3HeaderCodec;
            thread::Builder::new()
                .name(format!("producer-{producer}"))
                .spawn(move || {
                    for request in 0..requests {
                        let mut server = tracer
                            .build_span("GET /orders")
                            .with_tag(tags::SPAN_KIND, tags::SERVER)
                            .start();
                        server.set_baggage_item("tenant", format!("t{}", producer % 3));

                        let mut client = tracer
                            .build_span("inventory.reserve")
                            .as_child_of(server.context())
                            .with_tag(tags::SPAN_KIND, tags::CLIENT)
                            .with_tag(tags::METHOD, "reserve")
                            .start();

                        let mut headers: Vec<(String, String)> = Vec::new();
                        tracer.inject(client.context(), &codec, &mut headers);
                        let downstream = tracer.extract(&codec, &headers);

                        let mut remote = tracer
                            .build_span("inventory.reserve")
                            .as_child_of(&downstream)
                            .with_tag(tags::SPAN_KIND, tags::SERVER)
                            .start();
                        if request % 10 == 0 {
                            remote.set_tag(tags::ERROR, true);
                            remote.log_event("stock unavailable");
                        }
                        thread::sleep(Duration::from_micros(200));
                        remote.finish();
                        client.finish();
                        server.finish();
                    }
                })
        })
        .collect::<Result<_, _>>()?;

    for handle in handles {
        if handle.join().is_err() {
            eprintln!("a producer thread panicked");
        }
    }
    let elapsed = started.elapsed();

    // Let at least one stat window close before stopping
    thread::sleep(Duration::from_millis(1_100));
    let metrics = runtime.tracer().metrics();
    let appender = Arc::clone(runtime.appender());
    runtime.shutdown();

    let spans = producers * requests * 3;
    println!("Results:");
    println!("   Spans finished: {spans} in {:.2?}", elapsed);
    println!("   Reported: {}  unreported: {}", metrics.reported, metrics.unreported);
    println!(
        "   Published: {}  delivered: {}  discarded: {}  sink errors: {}",
        appender.metrics().published(),
        appender.metrics().delivered(),
        appender.discarded(),
        appender.metrics().sink_errors()
    );
    println!("   Files:");
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            println!("      {} ({} bytes)", entry.file_name().to_string_lossy(), entry.metadata()?.len());
        }
    }
    Ok(())
}
