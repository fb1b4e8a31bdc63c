use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;

/// Error type returned by backend calls.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Asynchronous destination for [`LogRecord`]s produced by the logger.
///
/// Implementations transport records to a concrete backend (a search
/// index, an in-memory buffer, nothing at all). The delivery hook calls
/// `send` from its worker task and never awaits it on the caller's
/// thread; the health monitor calls `ping` on every tick.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Send a single log record to the underlying backend.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was accepted by the backend.
    /// - `Err(..)` if the backend failed (network error, serialization
    ///   error, rejected document). The hook does not retry; the record
    ///   is written to the overflow file instead.
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError>;

    /// Check that the backend is reachable.
    ///
    /// Callers bound this with their own timeout, so implementations may
    /// simply perform a cheap request and report its outcome.
    async fn ping(&self) -> Result<(), BoxError>;

    /// Flush any buffered records, if the backend implements buffering.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
