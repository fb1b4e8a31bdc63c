//! The process-wide logger instance.
//!
//! [`logger`] builds the instance lazily from the environment on first
//! use; [`init_logger`] lets a composition root build it explicitly
//! instead. Whichever runs first wins and the instance then lives for the
//! rest of the process.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::backend::{Connector, OpenSearchConnector};
use crate::config::LoggerConfig;
use crate::logger::{Logger, LoggerError};

/// A lazily-initialized logger slot. Initialization runs exactly once,
/// even when many threads race for the first access; every caller gets
/// the same instance and no losing builder ever starts a logger.
pub struct LoggerCell {
    cell: OnceLock<Logger>,
    // Held while building so a fallible init and an infallible one
    // never both run.
    init: Mutex<()>,
}

impl LoggerCell {
    pub const fn new() -> Self {
        LoggerCell {
            cell: OnceLock::new(),
            init: parking_lot::const_mutex(()),
        }
    }

    pub fn get(&self) -> Option<&Logger> {
        self.cell.get()
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> Logger) -> &Logger {
        if let Some(logger) = self.cell.get() {
            return logger;
        }
        let _building = self.init.lock();
        self.cell.get_or_init(init)
    }

    /// Build and store a logger unless the slot is already taken.
    ///
    /// `init` only runs when the slot is empty; otherwise this returns
    /// [`LoggerError::AlreadyInitialized`] without calling it.
    pub fn try_init(
        &self,
        init: impl FnOnce() -> Result<Logger, LoggerError>,
    ) -> Result<&Logger, LoggerError> {
        let _building = self.init.lock();
        if self.cell.get().is_some() {
            return Err(LoggerError::AlreadyInitialized);
        }
        let logger = init()?;
        Ok(self.cell.get_or_init(|| logger))
    }

    /// Store `logger` unless the slot is already taken, in which case the
    /// given logger is dropped.
    pub fn set(&self, logger: Logger) -> Result<&Logger, LoggerError> {
        self.try_init(|| Ok(logger))
    }
}

impl Default for LoggerCell {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LoggerCell = LoggerCell::new();

/// The process-wide logger, built from [`LoggerConfig::from_env`] on
/// first use.
///
/// The first call may block for up to the configured ping timeout while
/// the backend is pinged. An unset or unreachable backend still yields a
/// working logger.
///
/// # Panics
///
/// If the background runtime cannot be started. Use [`init_logger`] to
/// handle that error instead.
pub fn logger() -> &'static Logger {
    GLOBAL.get_or_init(|| {
        Logger::new(LoggerConfig::from_env()).expect("failed to start the log delivery runtime")
    })
}

/// Build the process-wide logger from an explicit configuration.
///
/// Fails with [`LoggerError::AlreadyInitialized`] once [`logger`] or a
/// previous `init_logger` has created the instance.
pub fn init_logger(config: LoggerConfig) -> Result<&'static Logger, LoggerError> {
    init_logger_with(config, Arc::new(OpenSearchConnector))
}

/// [`init_logger`] with a custom way of building backend clients.
pub fn init_logger_with(
    config: LoggerConfig,
    connector: Arc<dyn Connector>,
) -> Result<&'static Logger, LoggerError> {
    GLOBAL.try_init(|| Logger::with_connector(config, connector))
}

/// The process-wide logger if it has been created.
pub fn try_logger() -> Option<&'static Logger> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::connector_fn;
    use crate::memory_sink::MemorySink;
    use crate::sink::LogSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    struct Counters {
        builds: AtomicUsize,
        connects: Arc<AtomicUsize>,
    }

    impl Counters {
        fn new() -> Arc<Self> {
            Arc::new(Counters {
                builds: AtomicUsize::new(0),
                connects: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    fn counted_logger(dir: &std::path::Path, counters: &Counters) -> Logger {
        counters.builds.fetch_add(1, Ordering::SeqCst);
        let connects = Arc::clone(&counters.connects);
        let sink = MemorySink::new();
        let config = LoggerConfig {
            overflow_path: dir.join("logs.txt"),
            echo: false,
            health_check_interval: Duration::from_secs(3600),
            ..LoggerConfig::with_backend("memory://")
        };
        let connector = connector_fn(move |_config| {
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(sink.clone()) as Arc<dyn LogSink>)
        });
        Logger::with_connector(config, connector).unwrap()
    }

    #[test]
    fn concurrent_first_access_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let cell = LoggerCell::new();
        let counters = Counters::new();
        let barrier = Barrier::new(16);

        let instances: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let (cell, barrier, counters, dir) = (&cell, &barrier, &counters, &dir);
                    scope.spawn(move || {
                        barrier.wait();
                        // Half the threads take the fallible path.
                        let logger = if i % 2 == 0 {
                            cell.get_or_init(|| counted_logger(dir.path(), counters))
                        } else {
                            match cell.try_init(|| Ok(counted_logger(dir.path(), counters))) {
                                Ok(logger) => logger,
                                Err(_) => cell.get().unwrap(),
                            }
                        };
                        logger as *const Logger as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(instances.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(counters.builds.load(Ordering::SeqCst), 1);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
        assert!(cell.get().unwrap().is_connected());
    }

    #[test]
    fn try_init_after_init_does_not_build() {
        let dir = tempfile::tempdir().unwrap();
        let cell = LoggerCell::new();
        let counters = Counters::new();

        let first = cell.set(counted_logger(dir.path(), &counters)).unwrap() as *const Logger;
        let second = cell.try_init(|| Ok(counted_logger(dir.path(), &counters)));

        assert!(matches!(second, Err(LoggerError::AlreadyInitialized)));
        assert_eq!(cell.get().unwrap() as *const Logger, first);
        assert_eq!(counters.builds.load(Ordering::SeqCst), 1);
    }
}
