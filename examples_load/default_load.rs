use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use search_log_sink::init::init_tracing;
use search_log_sink::noop_sink::NoopSink;
use search_log_sink::{connector_fn, LogSink, Logger, LoggerConfig};

#[tokio::main]
async fn main() {
    let config = LoggerConfig {
        echo: false,
        ..LoggerConfig::with_backend("noop://")
    };
    let connector = connector_fn(|_| Ok(Arc::new(NoopSink) as Arc<dyn LogSink>));
    let logger = Logger::with_connector(config, connector).expect("failed to start logger");
    init_tracing(logger.clone()).expect("another subscriber is already installed");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: logged {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Give the delivery worker a little time to drain the queue
    sleep(Duration::from_secs(2)).await;
    if let Some(stats) = logger.hook_stats() {
        println!("{stats:?}");
    }
}
