//! The process-wide structured logger.
//!
//! A [`Logger`] owns at most one backend connection (a client plus the
//! [`DeliveryHook`] wrapping it), a [`HealthMonitor`] and the
//! [`OverflowStore`]. Connections are immutable: a rebuild builds a new
//! one and swaps it in under a short lock, never touching the old client.
//! All background work runs on a small runtime owned by the logger, so
//! logging works the same from synchronous code and from any executor.

use std::future::Future;
use std::io::{self, Write};
use std::panic::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::timeout;
use tracing::{debug, warn, Level};

use crate::backend::{BackendConfig, BackendError, Connector, OpenSearchConnector};
use crate::config::LoggerConfig;
use crate::format::{EcsFormatter, LogFormatter};
use crate::hook::{DeliveryHook, HookStatsSnapshot};
use crate::monitor::{HealthMonitor, HealthOutcome, Reconnect};
use crate::overflow::OverflowStore;
use crate::record::{Fields, LogRecord};
use crate::sink::{BoxError, LogSink};

/// Target stamped on records created through [`Logger::log`].
pub const LOG_TARGET: &str = "log";

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("failed to start log delivery runtime: {0}")]
    Runtime(#[from] io::Error),

    #[error("global logger is already initialized")]
    AlreadyInitialized,
}

/// Why a backend client could not be brought up.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Build(#[from] BackendError),

    #[error("backend ping failed: {0}")]
    Unreachable(BoxError),

    #[error("backend ping timed out after {0:?}")]
    Timeout(Duration),
}

/// Cheaply cloneable handle to a logger; clones share everything.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

// `runtime` must stay the last field: it is torn down only after the
// `Drop` impl has drained the connection.
struct Inner {
    config: LoggerConfig,
    connector: Arc<dyn Connector>,
    formatter: Arc<dyn LogFormatter>,
    overflow: Arc<OverflowStore>,
    connection: Mutex<Option<Arc<Connection>>>,
    rebuild: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<HealthMonitor>>,
    runtime: BackgroundRuntime,
}

/// A backend client together with the hook feeding it.
struct Connection {
    backend: Arc<dyn LogSink>,
    hook: DeliveryHook,
}

impl Logger {
    /// Build a logger talking to an OpenSearch/Elasticsearch backend.
    ///
    /// Blocks for at most `config.ping_timeout` while the backend is
    /// pinged. An unset or unreachable backend is not an error: the
    /// logger starts without one and the health monitor keeps retrying.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        Self::with_connector(config, Arc::new(OpenSearchConnector))
    }

    /// Same as [`Logger::new`] with a custom way of building backend
    /// clients.
    pub fn with_connector(
        config: LoggerConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, LoggerError> {
        let runtime = BackgroundRuntime::new()?;
        let formatter: Arc<dyn LogFormatter> = Arc::new(EcsFormatter);
        let overflow = Arc::new(OverflowStore::new(
            config.overflow_path.clone(),
            config.overflow_max_bytes,
            Arc::clone(&formatter),
        ));

        let inner = Arc::new(Inner {
            config,
            connector,
            formatter,
            overflow,
            connection: Mutex::new(None),
            rebuild: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
            runtime,
        });

        match &inner.config.backend {
            Some(backend) => match inner.runtime.block_on(inner.connect(backend)) {
                Ok(client) => inner.attach(client),
                Err(e) => {
                    warn!(error = %e, "log backend unavailable at startup, continuing without it")
                }
            },
            None => warn!("log backend address is not set, records are only written locally"),
        }

        let target: Weak<dyn Reconnect> = Arc::downgrade(&inner) as Weak<dyn Reconnect>;
        let period = inner.config.health_check_interval;
        let monitor = HealthMonitor::spawn(target, period, inner.runtime.handle());
        *inner.monitor.lock() = Some(monitor);

        Ok(Logger { inner })
    }

    /// Log `message` with structured `fields` at `level`.
    ///
    /// Never blocks on the backend: the record is echoed locally (when
    /// enabled) and queued on the attached hook, if any.
    #[track_caller]
    pub fn log(&self, level: Level, message: impl Into<String>, fields: Fields) {
        if !self.enabled(level) {
            return;
        }
        let location = Location::caller();
        let record = LogRecord {
            timestamp: Utc::now(),
            level: level.to_string(),
            target: LOG_TARGET.to_string(),
            module_path: None,
            file: Some(location.file().to_string()),
            line: Some(location.line()),
            fields,
            message: Some(message.into()),
            service_name: self.inner.config.service_name.clone(),
        };
        self.dispatch(record);
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::INFO, message, fields);
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::WARN, message, fields);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::ERROR, message, fields);
    }

    /// Log an already-built record. Records whose level is more verbose
    /// than the configured minimum are ignored; unknown level names pass.
    pub fn log_record(&self, mut record: LogRecord) {
        if let Ok(level) = record.level.parse::<Level>() {
            if !self.enabled(level) {
                return;
            }
        }
        if record.service_name.is_none() {
            record.service_name = self.inner.config.service_name.clone();
        }
        self.dispatch(record);
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.inner.config.min_level
    }

    /// Whether a backend client is currently attached.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    /// Counters of the currently attached hook.
    pub fn hook_stats(&self) -> Option<HookStatsSnapshot> {
        self.inner.connection.lock().as_ref().map(|c| c.hook.stats())
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    pub fn overflow(&self) -> &OverflowStore {
        &self.inner.overflow
    }

    /// Run one health-monitor tick now instead of waiting for the timer.
    pub async fn check_health(&self) -> HealthOutcome {
        let inner = Arc::clone(&self.inner);
        let tick = self
            .inner
            .runtime
            .handle()
            .spawn(async move { inner.check_and_rebuild().await });
        tick.await.unwrap_or(HealthOutcome::RebuildFailed)
    }

    /// Signal the health monitor to stop. Logging keeps working; the
    /// connection simply stops being checked.
    pub fn stop_monitor(&self) {
        if let Some(monitor) = self.inner.monitor.lock().as_ref() {
            monitor.stop();
        }
    }

    pub fn monitor_running(&self) -> bool {
        self.inner.monitor.lock().as_ref().map_or(false, |m| !m.is_stopped())
    }

    /// Stop the health monitor, then detach the connection and wait (at
    /// most one delivery timeout) for its queue to drain.
    ///
    /// Records logged afterwards are only echoed locally.
    pub async fn shutdown(&self) {
        let monitor = self.inner.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }
        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            let drain = self.inner.drain(connection);
            let _ = self.inner.runtime.handle().spawn(drain).await;
        }
    }

    fn dispatch(&self, record: LogRecord) {
        if self.inner.config.echo {
            self.echo(&record);
        }
        let connection = self.inner.connection.lock().clone();
        if let Some(connection) = connection {
            connection.hook.enqueue(record);
        }
    }

    fn echo(&self, record: &LogRecord) {
        let line = match self.inner.formatter.format(record) {
            Ok(line) => line,
            Err(_) => format!("{}\n", record.message_or_empty()).into_bytes(),
        };
        let _ = io::stderr().lock().write_all(&line);
    }
}

impl Inner {
    /// Build a fresh client and make sure it answers a ping in time.
    async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn LogSink>, ConnectError> {
        let client = self.connector.connect(config)?;
        match timeout(self.config.ping_timeout, client.ping()).await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => Err(ConnectError::Unreachable(e)),
            Err(_) => Err(ConnectError::Timeout(self.config.ping_timeout)),
        }
    }

    /// Swap in a new connection around `backend`. The previous one is
    /// dropped outside the lock; its worker drains what it still holds.
    fn attach(&self, backend: Arc<dyn LogSink>) {
        let hook = DeliveryHook::spawn(
            Arc::clone(&backend),
            Arc::clone(&self.overflow),
            self.config.hook.clone(),
            self.runtime.handle(),
        );
        let fresh = Arc::new(Connection { backend, hook });
        let previous = self.connection.lock().replace(fresh);
        drop(previous);
    }

    /// Close `connection`'s queue and wait for its worker, bounded by the
    /// delivery timeout. Whatever is still queued when the bound expires
    /// is abandoned.
    fn drain(&self, connection: Arc<Connection>) -> impl Future<Output = ()> + Send + 'static {
        let bound = self.config.hook.delivery_timeout;
        async move {
            // A concurrent `dispatch` may still hold a clone; dropping ours
            // then leaves the worker draining on its own.
            let Ok(connection) = Arc::try_unwrap(connection) else { return };
            if timeout(bound, connection.hook.close()).await.is_err() {
                warn!(?bound, "log delivery queue not drained before shutdown");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.stop();
        }
        if let Some(connection) = self.connection.get_mut().take() {
            let drain = self.drain(connection);
            self.runtime.block_on(drain);
        }
    }
}

#[async_trait]
impl Reconnect for Inner {
    async fn check_and_rebuild(&self) -> HealthOutcome {
        let Some(config) = self.config.backend.as_ref() else {
            return HealthOutcome::Unconfigured;
        };
        let _rebuilding = self.rebuild.lock().await;

        let current = self.connection.lock().clone();
        if let Some(current) = current {
            match timeout(self.config.ping_timeout, current.backend.ping()).await {
                Ok(Ok(())) => return HealthOutcome::Healthy,
                Ok(Err(e)) => warn!(error = %e, "log backend ping failed, rebuilding client"),
                Err(_) => warn!(
                    timeout = ?self.config.ping_timeout,
                    "log backend ping timed out, rebuilding client"
                ),
            }
        }

        match self.connect(config).await {
            Ok(client) => {
                self.attach(client);
                HealthOutcome::Rebuilt
            }
            Err(e) => {
                debug!(error = %e, "log backend still unavailable, keeping previous client");
                HealthOutcome::RebuildFailed
            }
        }
    }
}

/// Multi-threaded runtime dedicated to delivery workers and the monitor.
struct BackgroundRuntime {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl BackgroundRuntime {
    fn new() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("log-sink")
            .enable_all()
            .build()?;
        Ok(BackgroundRuntime {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Drive `future` to completion on this runtime from synchronous
    /// code. A helper thread does the blocking, so this is also safe to
    /// call from inside another runtime.
    fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let handle = self.handle.clone();
        std::thread::scope(|scope| {
            scope
                .spawn(move || handle.block_on(future))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connector_fn;
    use crate::memory_sink::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn config(dir: &tempfile::TempDir) -> LoggerConfig {
        LoggerConfig {
            overflow_path: dir.path().join("logs.txt"),
            echo: false,
            health_check_interval: Duration::from_secs(3600),
            ping_timeout: Duration::from_millis(200),
            ..LoggerConfig::with_backend("memory://")
        }
    }

    fn memory_connector(sink: &MemorySink, calls: Arc<AtomicUsize>) -> Arc<dyn Connector> {
        let sink = sink.clone();
        connector_fn(move |_config| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(sink.clone()) as Arc<dyn LogSink>)
        })
    }

    fn memory_logger(dir: &tempfile::TempDir, sink: &MemorySink) -> Logger {
        Logger::with_connector(config(dir), memory_connector(sink, Arc::default())).unwrap()
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn log_reaches_backend_with_caller_location() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let logger = memory_logger(&dir, &sink);
        assert!(logger.is_connected());

        let mut fields = Fields::new();
        fields.insert("order_id".to_string(), 7.into());
        logger.info("order placed", fields);

        wait_for(|| sink.len() == 1).await;
        let record = &sink.records()[0];
        assert_eq!(record.message.as_deref(), Some("order placed"));
        assert_eq!(record.level, "INFO");
        assert_eq!(record.fields["order_id"], 7);
        assert_eq!(record.file.as_deref(), Some(file!()));
    }

    #[tokio::test]
    async fn records_below_min_level_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let logger = memory_logger(&dir, &sink);

        logger.log(Level::DEBUG, "noise", Fields::new());
        logger.log_record(LogRecord::new("TRACE", "t").with_message("more noise"));
        logger.error("kept", Fields::new());

        wait_for(|| sink.len() == 1).await;
        assert_eq!(sink.records()[0].message.as_deref(), Some("kept"));
        assert_eq!(logger.hook_stats().unwrap().enqueued, 1);
    }

    #[tokio::test]
    async fn unreachable_backend_at_startup_leaves_logger_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        sink.set_reachable(false);
        let logger = memory_logger(&dir, &sink);

        assert!(!logger.is_connected());
        assert!(logger.hook_stats().is_none());
        logger.info("not shipped", Fields::new());
        assert_eq!(logger.check_health().await, HealthOutcome::RebuildFailed);
    }

    #[tokio::test]
    async fn healthy_backend_is_not_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = memory_connector(&sink, Arc::clone(&calls));
        let logger = Logger::with_connector(config(&dir), connector).unwrap();

        assert_eq!(logger.check_health().await, HealthOutcome::Healthy);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // One ping at startup, one for the health check.
        assert_eq!(sink.pings(), 2);
    }

    #[tokio::test]
    async fn failed_ping_rebuilds_with_a_new_client() {
        let dir = tempfile::tempdir().unwrap();
        let first = MemorySink::new();
        let second = MemorySink::new();
        let clients = vec![first.clone(), second.clone()];
        let next = Arc::new(AtomicUsize::new(0));
        let connector = connector_fn(move |_config| {
            let i = next.fetch_add(1, Ordering::SeqCst).min(1);
            Ok(Arc::new(clients[i].clone()) as Arc<dyn LogSink>)
        });
        let logger = Logger::with_connector(config(&dir), connector).unwrap();

        first.set_reachable(false);
        assert_eq!(logger.check_health().await, HealthOutcome::Rebuilt);

        logger.info("after rebuild", Fields::new());
        wait_for(|| second.len() == 1).await;
        assert!(first.is_empty());
    }

    #[tokio::test]
    async fn connector_errors_keep_the_previous_client() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let built = Arc::new(AtomicUsize::new(0));
        let connector = {
            let sink = sink.clone();
            connector_fn(move |_config| {
                if built.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(Arc::new(sink.clone()) as Arc<dyn LogSink>)
                } else {
                    Err(BackendError::MissingUrl)
                }
            })
        };
        let logger = Logger::with_connector(config(&dir), connector).unwrap();

        sink.set_reachable(false);
        assert_eq!(logger.check_health().await, HealthOutcome::RebuildFailed);
        assert!(logger.is_connected());
    }

    #[tokio::test]
    async fn monitor_stops_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let logger = memory_logger(&dir, &MemorySink::new());
        assert!(logger.monitor_running());

        logger.stop_monitor();
        assert!(!logger.monitor_running());
        logger.shutdown().await;
    }

    fn numbered(i: u64) -> Fields {
        let mut fields = Fields::new();
        fields.insert("iteration".to_string(), i.into());
        fields
    }

    #[test]
    fn dropping_the_last_handle_delivers_queued_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        sink.set_delay(Duration::from_millis(5));
        let logger = memory_logger(&dir, &sink);

        for i in 0..20 {
            logger.info("queued", numbered(i));
        }
        drop(logger);

        let delivered: Vec<u64> = sink
            .records()
            .iter()
            .map(|r| r.fields["iteration"].as_u64().unwrap())
            .collect();
        assert_eq!(delivered, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn dropping_the_last_handle_overflows_undeliverable_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let logger = memory_logger(&dir, &sink);
        let overflow_path = logger.overflow().path().to_path_buf();
        sink.set_failing(true);

        for i in 0..10 {
            logger.error("rejected", numbered(i));
        }
        drop(logger);

        let contents = std::fs::read_to_string(overflow_path).unwrap();
        assert_eq!(contents.lines().count(), 10);
        assert!(sink.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_drains_and_detaches_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        sink.set_delay(Duration::from_millis(2));
        let logger = memory_logger(&dir, &sink);

        for i in 0..10 {
            logger.info("before shutdown", numbered(i));
        }
        logger.shutdown().await;

        assert_eq!(sink.len(), 10);
        assert!(!logger.is_connected());
        assert!(!logger.monitor_running());

        logger.info("after shutdown", Fields::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.len(), 10);
    }

    #[test]
    fn works_without_an_ambient_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let logger = memory_logger(&dir, &sink);

        logger.warn("from a plain thread", Fields::new());

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.is_empty() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
