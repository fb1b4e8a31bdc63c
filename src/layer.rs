use crate::logger::Logger;
use crate::record::{Fields, LogRecord};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate never go back into the logger.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to a [`Logger`].
///
/// Level filtering follows the logger's configured minimum. The layer
/// itself never blocks: queueing and delivery are the logger's job.
pub struct SinkLayer {
    logger: Logger,
    ignored_targets: Vec<String>,
    /// Total events seen by the layer (before any filtering).
    pub total_events: Arc<AtomicU64>,
    /// Events passed on to the logger.
    pub forwarded_events: Arc<AtomicU64>,
}

impl SinkLayer {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            ignored_targets: Vec::new(),
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Skip events whose target equals or is nested under `prefix`.
    pub fn ignore_target(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_targets.push(prefix.into());
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        is_under(target, OWN_TARGET)
            || self.ignored_targets.iter().any(|prefix| is_under(target, prefix))
    }
}

fn is_under(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if !self.logger.enabled(*meta.level()) || self.is_ignored(meta.target()) {
            return;
        }

        let mut fields = Fields::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            fields,
            message,
            service_name: None,
        };

        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
        self.logger.log_record(record);
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            let value = serde_json::Value::String(value.to_string());
            self.fields.insert(field.name().to_string(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let value = serde_json::Value::String(value.to_string());
        self.fields.insert(field.name().to_string(), value);
    }

    // `format_args!` messages arrive here rather than through `record_str`.
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            let value = serde_json::Value::String(format!("{:?}", value));
            self.fields.insert(field.name().to_string(), value);
        }
    }
}
