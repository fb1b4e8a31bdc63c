use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use search_log_sink::{
    connector_fn,
    init::init_tracing,
    record::LogRecord,
    sink::{BoxError, LogSink},
    Logger, LoggerConfig,
};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// client.
struct MyCustomDbSink {
    dsn: String,
}

#[async_trait]
impl LogSink for MyCustomDbSink {
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        // Here you would call your own client library for the target DB.
        // For the sake of example we just print the record.
        println!("[my-custom-db {}] {:?}", self.dsn, record);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let config = LoggerConfig {
        service_name: Some("custom-backend-example".to_string()),
        ..LoggerConfig::with_backend("my-custom-db://localhost")
    };
    // The connector runs at startup and again after every failed ping.
    let connector = connector_fn(|backend| {
        Ok(Arc::new(MyCustomDbSink { dsn: backend.url.clone() }) as Arc<dyn LogSink>)
    });
    let logger = Logger::with_connector(config, connector).expect("failed to start logger");

    init_tracing(logger.clone()).expect("another subscriber is already installed");

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}
