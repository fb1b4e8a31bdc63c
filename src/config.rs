use std::path::PathBuf;
use std::time::Duration;

use tracing::Level;

use crate::backend::{
    BackendConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INDEX_PREFIX, DEFAULT_RESPONSE_TIMEOUT,
};
use crate::env::*;
use crate::hook::{HookConfig, DEFAULT_QUEUE_CAPACITY};
use crate::overflow::{DEFAULT_OVERFLOW_MAX_BYTES, DEFAULT_OVERFLOW_PATH};

/// Default period of the health monitor.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on a single reachability check.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Logger configuration.
///
/// **Fields**
/// - `backend`: search backend settings; `None` runs the logger in
///   echo-only mode and the health monitor never attempts a connection.
/// - `hook`: delivery queue capacity and per-record send timeout.
/// - `health_check_interval` / `ping_timeout`: monitor period and the
///   bound on every reachability check, including the one at startup.
/// - `overflow_path` / `overflow_max_bytes`: local fallback file.
/// - `min_level`: records more verbose than this are ignored.
/// - `echo`: write every formatted record to stderr as well.
/// - `service_name`: stamped on records created by the logger.
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub backend: Option<BackendConfig>,
    pub hook: HookConfig,
    pub health_check_interval: Duration,
    pub ping_timeout: Duration,
    pub overflow_path: PathBuf,
    pub overflow_max_bytes: u64,
    pub min_level: Level,
    pub echo: bool,
    pub service_name: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            backend: None,
            hook: HookConfig::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            overflow_path: PathBuf::from(DEFAULT_OVERFLOW_PATH),
            overflow_max_bytes: DEFAULT_OVERFLOW_MAX_BYTES,
            min_level: Level::INFO,
            echo: true,
            service_name: None,
        }
    }
}

impl LoggerConfig {
    /// Configuration with a backend at `url` and defaults elsewhere.
    pub fn with_backend(url: impl Into<String>) -> Self {
        Self {
            backend: Some(BackendConfig::new(url)),
            ..Self::default()
        }
    }

    /// Build a configuration from the `LOG_SINK_*` environment variables.
    ///
    /// Missing variables take their defaults; malformed numbers are
    /// logged and replaced by defaults.
    pub fn from_env() -> Self {
        let backend = env_opt(LOG_SINK_URL_ENV).map(|url| BackendConfig {
            url,
            username: env_opt(LOG_SINK_USERNAME_ENV),
            password: env_opt(LOG_SINK_PASSWORD_ENV),
            index_prefix: env_or(LOG_SINK_INDEX_ENV, DEFAULT_INDEX_PREFIX),
            rollover: Default::default(),
            connect_timeout: env_duration(
                LOG_SINK_CONNECT_TIMEOUT_MS_ENV,
                DEFAULT_CONNECT_TIMEOUT,
                Duration::from_millis,
            ),
            response_timeout: env_duration(
                LOG_SINK_RESPONSE_TIMEOUT_MS_ENV,
                DEFAULT_RESPONSE_TIMEOUT,
                Duration::from_millis,
            ),
        });

        let defaults = Self::default();
        Self {
            backend,
            hook: HookConfig {
                queue_capacity: env_parse(
                    LOG_SINK_QUEUE_CAPACITY_ENV,
                    DEFAULT_QUEUE_CAPACITY,
                    |n| *n > 0,
                ),
                ..defaults.hook
            },
            health_check_interval: env_duration(
                LOG_SINK_HEALTH_INTERVAL_SECS_ENV,
                DEFAULT_HEALTH_CHECK_INTERVAL,
                Duration::from_secs,
            ),
            overflow_path: PathBuf::from(env_or(LOG_SINK_OVERFLOW_PATH_ENV, DEFAULT_OVERFLOW_PATH)),
            service_name: env_opt(LOG_SINK_SERVICE_NAME_ENV),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global; keep every env-reading
    // assertion inside this single test.
    #[test]
    fn from_env_reads_backend_settings_and_falls_back_on_garbage_or_zero() {
        std::env::remove_var(LOG_SINK_URL_ENV);
        assert!(LoggerConfig::from_env().backend.is_none());

        std::env::set_var(LOG_SINK_URL_ENV, "http://es:9200");
        std::env::set_var(LOG_SINK_INDEX_ENV, "checkout");
        std::env::set_var(LOG_SINK_USERNAME_ENV, "elastic");
        std::env::set_var(LOG_SINK_HEALTH_INTERVAL_SECS_ENV, "0");
        std::env::set_var(LOG_SINK_CONNECT_TIMEOUT_MS_ENV, "not-a-number");
        std::env::set_var(LOG_SINK_RESPONSE_TIMEOUT_MS_ENV, "750");
        std::env::set_var(LOG_SINK_QUEUE_CAPACITY_ENV, "0");

        let config = LoggerConfig::from_env();
        let backend = config.backend.unwrap();
        assert_eq!(backend.url, "http://es:9200");
        assert_eq!(backend.index_prefix, "checkout");
        assert_eq!(backend.username.as_deref(), Some("elastic"));
        assert_eq!(backend.response_timeout, Duration::from_millis(750));
        assert_eq!(backend.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.health_check_interval, DEFAULT_HEALTH_CHECK_INTERVAL);
        assert_eq!(config.hook.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        for key in [
            LOG_SINK_URL_ENV,
            LOG_SINK_INDEX_ENV,
            LOG_SINK_USERNAME_ENV,
            LOG_SINK_HEALTH_INTERVAL_SECS_ENV,
            LOG_SINK_CONNECT_TIMEOUT_MS_ENV,
            LOG_SINK_RESPONSE_TIMEOUT_MS_ENV,
            LOG_SINK_QUEUE_CAPACITY_ENV,
        ] {
            std::env::remove_var(key);
        }
    }
}
