use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::sink::LogSink;

/// Index prefix used when none is configured.
pub const DEFAULT_INDEX_PREFIX: &str = "logs";

/// Default TCP connect timeout for the backend client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for a backend request to complete.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the target index name rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexRollover {
    /// `<prefix>-<year>-<month>-<day>`
    #[default]
    Daily,
    /// `<prefix>-<year>-<month>`
    Monthly,
}

/// Connection settings for the search backend.
///
/// Read once at startup; a rebuild after an outage constructs a new
/// client from the same settings.
#[derive(Clone)]
pub struct BackendConfig {
    /// Base address, e.g. `http://127.0.0.1:9200`. A missing scheme
    /// defaults to `http://`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index_prefix: String,
    pub rollover: IndexRollover,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        BackendConfig {
            url: url.into(),
            username: None,
            password: None,
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
            rollover: IndexRollover::Daily,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Index that documents written at `now` belong to.
    pub fn index_name(&self, now: DateTime<Utc>) -> String {
        index_name(&self.index_prefix, self.rollover, now)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("index_prefix", &self.index_prefix)
            .field("rollover", &self.rollover)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

/// Rolling index name: `<prefix>-<year>-<month>[-<day>]`.
pub fn index_name(prefix: &str, rollover: IndexRollover, now: DateTime<Utc>) -> String {
    match rollover {
        IndexRollover::Daily => format!("{}-{}", prefix, now.format("%Y-%m-%d")),
        IndexRollover::Monthly => format!("{}-{}", prefix, now.format("%Y-%m")),
    }
}

/// Error type returned when building a backend client from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend address is not set")]
    MissingUrl,

    #[error("invalid backend address {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build backend HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builds backend clients. The logger calls this at startup and on every
/// rebuild, always discarding the previous client instead of mutating it.
///
/// Any `Fn(&BackendConfig) -> Result<Arc<dyn LogSink>, BackendError>`
/// closure is a connector, which is how custom backends are plugged in.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn LogSink>, BackendError>;
}

impl<F> Connector for F
where
    F: Fn(&BackendConfig) -> Result<Arc<dyn LogSink>, BackendError> + Send + Sync,
{
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn LogSink>, BackendError> {
        self(config)
    }
}

/// Wrap a closure as a shareable [`Connector`].
pub fn connector_fn<F>(f: F) -> Arc<dyn Connector>
where
    F: Fn(&BackendConfig) -> Result<Arc<dyn LogSink>, BackendError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Connector for OpenSearch and Elasticsearch clusters.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSearchConnector;

impl Connector for OpenSearchConnector {
    fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn LogSink>, BackendError> {
        let client = crate::opensearch::OpenSearchClient::new(config.clone())?;
        Ok(Arc::new(client) as Arc<dyn LogSink>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_and_monthly_index_names() {
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 0).unwrap();
        assert_eq!(index_name("svc", IndexRollover::Daily, now), "svc-2024-03-07");
        assert_eq!(index_name("svc", IndexRollover::Monthly, now), "svc-2024-03");
    }

    #[test]
    fn debug_output_hides_password() {
        let mut config = BackendConfig::new("http://localhost:9200");
        config.password = Some("hunter2".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn empty_address_is_rejected() {
        let err = OpenSearchConnector.connect(&BackendConfig::new("  ")).err().unwrap();
        assert!(matches!(err, BackendError::MissingUrl));
    }
}
