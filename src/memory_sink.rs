use crate::record::LogRecord;
use crate::sink::{BoxError, LogSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A sink that keeps every accepted record in memory.
///
/// Reachability, failures, per-record latency and a pause switch can be
/// toggled at runtime, which makes it the stand-in backend for outage and
/// overload drills. Clones share the same state.
#[derive(Clone)]
pub struct MemorySink {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    records: Mutex<Vec<LogRecord>>,
    reachable: AtomicBool,
    failing: AtomicBool,
    paused: AtomicBool,
    resume: Notify,
    delay: Mutex<Duration>,
    pings: AtomicU64,
}

impl MemorySink {
    /// A reachable, healthy sink.
    pub fn new() -> Self {
        MemorySink {
            inner: Arc::new(MemoryInner {
                records: Mutex::new(Vec::new()),
                reachable: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                resume: Notify::new(),
                delay: Mutex::new(Duration::ZERO),
                pings: AtomicU64::new(0),
            }),
        }
    }

    /// Unreachable sinks fail both `ping` and `send`.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Failing sinks answer `ping` but reject every record.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = delay;
    }

    /// Hold every `send` until [`MemorySink::resume`] is called.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.resume.notify_waiters();
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.inner.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `ping` calls observed so far.
    pub fn pings(&self) -> u64 {
        self.inner.pings.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self) {
        loop {
            let resumed = self.inner.resume.notified();
            if !self.inner.paused.load(Ordering::SeqCst) {
                return;
            }
            resumed.await;
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        self.wait_while_paused().await;

        let delay = *self.inner.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err("memory sink unreachable".into());
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err("memory sink rejected record".into());
        }

        self.inner.records.lock().push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("memory sink unreachable".into())
        }
    }
}
