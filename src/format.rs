//! Rendering of [`LogRecord`]s into Elastic Common Schema JSON lines.

use crate::record::LogRecord;
use serde_json::{Map, Value};

/// ECS schema version stamped on every document.
pub const ECS_VERSION: &str = "1.6.0";

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("failed to serialize log record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns a record into the bytes written to the local echo, the
/// overflow file and the backend document body.
///
/// Implementations must produce a single line; a trailing newline is
/// optional.
pub trait LogFormatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError>;
}

/// Formatter producing one ECS JSON object per line.
///
/// Custom fields are placed at the top level next to the ECS keys; when a
/// custom field collides with an ECS key the ECS value wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcsFormatter;

impl EcsFormatter {
    /// Build the ECS document for `record` as a JSON object.
    pub fn document(&self, record: &LogRecord) -> Map<String, Value> {
        let mut doc: Map<String, Value> = record
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        doc.insert(
            "@timestamp".to_string(),
            Value::String(record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
        );
        doc.insert("ecs.version".to_string(), Value::String(ECS_VERSION.to_string()));
        doc.insert("log.level".to_string(), Value::String(record.level.to_ascii_lowercase()));
        doc.insert("log.logger".to_string(), Value::String(record.target.clone()));
        doc.insert("message".to_string(), Value::String(record.message_or_empty().to_string()));

        if let Some(file) = &record.file {
            doc.insert("log.origin.file.name".to_string(), Value::String(file.clone()));
        }
        if let Some(line) = record.line {
            doc.insert("log.origin.file.line".to_string(), Value::from(line));
        }
        if let Some(module) = &record.module_path {
            doc.insert("log.origin.function".to_string(), Value::String(module.clone()));
        }
        if let Some(service) = &record.service_name {
            doc.insert("service.name".to_string(), Value::String(service.clone()));
        }

        doc
    }
}

impl LogFormatter for EcsFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, FormatError> {
        let mut out = serde_json::to_vec(&self.document(record))?;
        out.push(b'\n');
        Ok(out)
    }
}
