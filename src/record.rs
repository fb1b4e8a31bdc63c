use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Structured fields attached to a [`LogRecord`].
pub type Fields = BTreeMap<String, serde_json::Value>;

/// One structured log entry as it travels through the delivery pipeline.
///
/// Records are moved by value into the delivery queue, so whatever the
/// caller keeps mutating after `log` returns never reaches the backend.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: Fields,
    pub message: Option<String>,
    pub service_name: Option<String>,
}

impl LogRecord {
    /// A record stamped with the current time and no location metadata.
    pub fn new(level: impl Into<String>, target: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            target: target.into(),
            module_path: None,
            file: None,
            line: None,
            fields: Fields::new(),
            message: None,
            service_name: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Message text, or an empty string when the record carries none.
    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}
