//! Periodic reachability check and reconnect loop.
//!
//! The monitor owns no backend state. Every tick it asks its target (the
//! logger) to check the attached client and rebuild it when needed; the
//! target reports what happened as a [`HealthOutcome`].

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shortest period the loop runs at; smaller (including zero) periods
/// are raised to this.
pub const MIN_HEALTH_CHECK_PERIOD: Duration = Duration::from_millis(10);

/// Result of one monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// The attached client answered its ping.
    Healthy,
    /// A new client was built, answered its ping and was swapped in.
    Rebuilt,
    /// No usable client could be built; the previous state is kept.
    RebuildFailed,
    /// No backend is configured, so there is nothing to check.
    Unconfigured,
}

/// Something the monitor can check and repair.
#[async_trait]
pub trait Reconnect: Send + Sync {
    async fn check_and_rebuild(&self) -> HealthOutcome;
}

/// Handle to a running monitor task.
///
/// The loop stops when [`HealthMonitor::stop`] is called or once its
/// target has been dropped.
pub struct HealthMonitor {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the loop on `runtime`. The first tick fires one `period`
    /// after start; `period` is at least [`MIN_HEALTH_CHECK_PERIOD`].
    pub fn spawn(target: Weak<dyn Reconnect>, period: Duration, runtime: &Handle) -> Self {
        let token = CancellationToken::new();
        let task = runtime.spawn(run(target, period, token.clone()));
        HealthMonitor { token, task }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }

    /// Stop the loop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run(target: Weak<dyn Reconnect>, period: Duration, token: CancellationToken) {
    let period = period.max(MIN_HEALTH_CHECK_PERIOD);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(?period, "health monitor started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else { break };
                let outcome = tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = target.check_and_rebuild() => outcome,
                };
                match outcome {
                    HealthOutcome::Rebuilt => info!("log backend reconnected"),
                    other => debug!(outcome = ?other, "health check finished"),
                }
            }
        }
    }
    debug!("health monitor stopped");
}
