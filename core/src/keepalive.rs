//! Periodic health checking of started tunnels.
//!
//! A single recurring scheduler probes every started, stale tunnel in the
//! registry and replaces the forwarding process of any that fail. Interval
//! changes tear the scheduler down and start a fresh one; an in-flight timer
//! is never adjusted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::registry::TunnelRegistry;

/// A started tunnel whose last successful probe is older than this is due
/// for a check. Stopped tunnels are never selected.
const STALENESS_THRESHOLD: Duration = Duration::from_secs(60);

/// The health-check scheduler.
pub struct KeepAlive {
    registry: Arc<TunnelRegistry>,
    task: Mutex<Option<SchedulerTask>>,
}

struct SchedulerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    interval: Duration,
}

impl KeepAlive {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        Self {
            registry,
            task: Mutex::new(None),
        }
    }

    /// Starts the scheduler at the given cadence. A no-op if already running.
    pub async fn start(&self, interval: Duration) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick is skipped; checks begin one interval in.
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => check_tunnels(&registry).await,
                    _ = shutdown_rx.changed() => {
                        info!("Keepalive scheduler stopped");
                        return;
                    }
                }
            }
        });

        info!(interval = ?interval, "Keepalive scheduler started");
        *task = Some(SchedulerTask {
            shutdown,
            handle,
            interval,
        });
    }

    /// Stops the scheduler and waits for the task to finish.
    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let _ = task.handle.await;
        }
    }

    /// Replaces the scheduler with one at a new cadence.
    /// The old task is fully stopped before the new one is spawned.
    pub async fn restart(&self, interval: Duration) {
        self.stop().await;
        self.start(interval).await;
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Cadence of the running scheduler, if any.
    pub async fn interval(&self) -> Option<Duration> {
        self.task.lock().await.as_ref().map(|t| t.interval)
    }
}

/// One round of checks: select started, stale tunnels and probe them
/// concurrently. A tunnel whose process died or whose probe fails is
/// stopped and started again, once per round.
async fn check_tunnels(registry: &TunnelRegistry) {
    let mut checks = JoinSet::new();
    for tunnel in registry.snapshot() {
        if !tunnel.is_started().await || !tunnel.needs_check(STALENESS_THRESHOLD) {
            continue;
        }
        checks.spawn(async move {
            if !tunnel.is_running().await || !tunnel.probe().await {
                info!(id = %tunnel.id(), "Restarting tunnel");
                tunnel.stop().await;
                if let Err(e) = tunnel.start().await {
                    error!(id = %tunnel.id(), error = %e, "Failed to restart tunnel");
                }
            }
        });
    }
    while checks.join_next().await.is_some() {}
}
