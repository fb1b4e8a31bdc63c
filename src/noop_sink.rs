use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;

/// A sink that is always reachable and simply drops all records.
///
/// Useful for measuring the overhead of the logger itself without any
/// external I/O.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), BoxError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
