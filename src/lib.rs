//! Structured request logging shipped to an OpenSearch/Elasticsearch index,
//! with a non-blocking delivery queue, a reconnecting health monitor and a
//! size-bounded local overflow file for records the backend rejects.

pub mod record;
pub mod format;
pub mod sink;
pub mod backend;
pub mod opensearch;
pub mod env;
pub mod config;
pub mod overflow;
pub mod hook;
pub mod monitor;
pub mod logger;
pub mod global;
pub mod layer;
pub mod init;
pub mod request;

pub mod noop_sink;
pub mod memory_sink;

pub use backend::{connector_fn, BackendConfig, Connector, IndexRollover, OpenSearchConnector};
pub use config::LoggerConfig;
pub use global::{init_logger, init_logger_with, logger, try_logger, LoggerCell};
pub use logger::{Logger, LoggerError};
pub use monitor::HealthOutcome;
pub use record::{Fields, LogRecord};
pub use sink::LogSink;
pub use tracing::Level;
