use crate::overflow::OverflowStore;
use crate::record::LogRecord;
use crate::sink::LogSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{trace, warn};

/// Default number of records a hook queues before dropping new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default upper bound on a single backend `send`.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_QUEUE_CAPACITY: usize = 16;

#[derive(Clone, Debug)]
pub struct HookConfig {
    pub queue_capacity: usize,
    pub delivery_timeout: Duration,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Counters shared between a hook and its worker.
#[derive(Debug, Default)]
pub struct HookStats {
    /// Accepted into the queue.
    pub enqueued: AtomicU64,
    /// Rejected because the queue was full.
    pub dropped: AtomicU64,
    /// Accepted by the backend.
    pub delivered: AtomicU64,
    /// Handed to the overflow store after a failed or timed out send.
    pub overflowed: AtomicU64,
    /// Neither delivered nor handed over, e.g. the overflow write panicked.
    pub lost: AtomicU64,
}

/// Point-in-time copy of [`HookStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub overflowed: u64,
    pub lost: u64,
}

impl HookStats {
    pub fn snapshot(&self) -> HookStatsSnapshot {
        HookStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

/// Decouples callers from backend latency.
///
/// Records go through a bounded channel to a single worker task that
/// sends them to the backend in arrival order. A full channel drops the
/// record on the spot; a failed send routes it to the [`OverflowStore`].
/// Dropping the hook closes the channel, and the worker exits after
/// draining whatever was still queued.
pub struct DeliveryHook {
    sender: mpsc::Sender<LogRecord>,
    stats: Arc<HookStats>,
    worker: JoinHandle<()>,
}

impl DeliveryHook {
    /// Create a hook around `backend` and spawn its worker on `runtime`.
    ///
    /// Queue capacities below 16 are raised to 16.
    pub fn spawn(
        backend: Arc<dyn LogSink>,
        overflow: Arc<OverflowStore>,
        config: HookConfig,
        runtime: &Handle,
    ) -> Self {
        let capacity = config.queue_capacity.max(MIN_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel::<LogRecord>(capacity);
        let stats = Arc::new(HookStats::default());

        let worker = runtime.spawn(run_worker(
            rx,
            backend,
            overflow,
            Arc::clone(&stats),
            config.delivery_timeout,
        ));

        DeliveryHook {
            sender: tx,
            stats,
            worker,
        }
    }

    /// Queue `record` for delivery without waiting. Never fails from the
    /// caller's point of view; a full or closed queue drops the record.
    pub fn enqueue(&self, record: LogRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("delivery queue full, dropping log record");
            }
        }
    }

    pub fn stats(&self) -> HookStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of records waiting in the queue.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn close(self) {
        let DeliveryHook { sender, worker, .. } = self;
        drop(sender);
        let _ = worker.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<LogRecord>,
    backend: Arc<dyn LogSink>,
    overflow: Arc<OverflowStore>,
    stats: Arc<HookStats>,
    delivery_timeout: Duration,
) {
    while let Some(record) = rx.recv().await {
        let cause = match timeout(delivery_timeout, backend.send(&record)).await {
            Ok(Ok(())) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("delivery timed out after {delivery_timeout:?}"),
        };

        // File I/O runs on the blocking pool so the worker's runtime
        // thread stays free while the store lock is contended.
        let store = Arc::clone(&overflow);
        match tokio::task::spawn_blocking(move || store.persist(&record, &cause)).await {
            Ok(()) => {
                stats.overflowed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.lost.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "overflow write did not complete, log record lost");
            }
        }
    }

    if let Err(e) = backend.flush().await {
        trace!(error = %e, "backend flush failed after queue closed");
    }
}
