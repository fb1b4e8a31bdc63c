//! Environment variable names read by [`LoggerConfig::from_env`].
//!
//! These are purely helpers; the logger itself only ever sees an
//! explicit [`LoggerConfig`].
//!
//! [`LoggerConfig::from_env`]: crate::config::LoggerConfig::from_env
//! [`LoggerConfig`]: crate::config::LoggerConfig

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Search backend base URL, e.g. `http://127.0.0.1:9200`. Unset means
/// the logger runs without a backend.
pub const LOG_SINK_URL_ENV: &str = "LOG_SINK_URL";

/// Optional basic-auth user name.
pub const LOG_SINK_USERNAME_ENV: &str = "LOG_SINK_USERNAME";

/// Optional basic-auth password.
pub const LOG_SINK_PASSWORD_ENV: &str = "LOG_SINK_PASSWORD";

/// Index name prefix; the date suffix is appended per document.
pub const LOG_SINK_INDEX_ENV: &str = "LOG_SINK_INDEX";

/// Optional logical service name stamped on every record.
pub const LOG_SINK_SERVICE_NAME_ENV: &str = "LOG_SINK_SERVICE_NAME";

/// Path of the local overflow file.
pub const LOG_SINK_OVERFLOW_PATH_ENV: &str = "LOG_SINK_OVERFLOW_PATH";

pub const LOG_SINK_HEALTH_INTERVAL_SECS_ENV: &str = "LOG_SINK_HEALTH_INTERVAL_SECS";
pub const LOG_SINK_CONNECT_TIMEOUT_MS_ENV: &str = "LOG_SINK_CONNECT_TIMEOUT_MS";
pub const LOG_SINK_RESPONSE_TIMEOUT_MS_ENV: &str = "LOG_SINK_RESPONSE_TIMEOUT_MS";
pub const LOG_SINK_QUEUE_CAPACITY_ENV: &str = "LOG_SINK_QUEUE_CAPACITY";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or malformed. Values rejected by `accept` count as malformed.
pub fn env_parse<T: FromStr>(key: &str, default: T, accept: impl Fn(&T) -> bool) -> T {
    let Some(raw) = env_opt(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) if accept(&value) => value,
        _ => {
            warn!(key, value = %raw, "ignoring malformed environment variable");
            default
        }
    }
}

/// A duration given as a whole number of `unit`s. Zero is malformed.
pub fn env_duration(key: &str, default: Duration, unit: fn(u64) -> Duration) -> Duration {
    match env_parse(key, 0, |n: &u64| *n > 0) {
        0 => default,
        n => unit(n),
    }
}
