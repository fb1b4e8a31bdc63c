use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use search_log_sink::hook::HookConfig;
use search_log_sink::init::{init_tracing_with_config, LayerConfig};
use search_log_sink::memory_sink::MemorySink;
use search_log_sink::{connector_fn, LogSink, Logger, LoggerConfig};

#[tokio::main]
async fn main() {
    // A slow backend so the queue actually fills up.
    let sink = MemorySink::new();
    sink.set_delay(Duration::from_micros(50));

    let config = LoggerConfig {
        echo: false,
        hook: HookConfig {
            queue_capacity: 50_000,
            delivery_timeout: Duration::from_secs(1),
        },
        overflow_path: std::env::temp_dir().join("custom_load_overflow.txt"),
        ..LoggerConfig::with_backend("memory://")
    };
    let backend = sink.clone();
    let connector = connector_fn(move |_| Ok(Arc::new(backend.clone()) as Arc<dyn LogSink>));
    let logger = Logger::with_connector(config, connector).expect("failed to start logger");

    let layer_config = LayerConfig {
        enable_stdout: false,
        ..LayerConfig::default()
    };
    init_tracing_with_config(logger.clone(), layer_config)
        .expect("another subscriber is already installed");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    sleep(Duration::from_secs(2)).await;
    println!("delivered {} records, {:?}", sink.len(), logger.hook_stats());
}
