//! Periodic cleanup of violation records and stale window counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use super::violations::SweepStats;

/// Handle to a running maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Summary of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub violations: SweepStats,
    pub purged_counters: usize,
}

impl RateLimiter {
    /// Run one maintenance pass: sweep the violation tracker, then drop
    /// counters whose window has elapsed.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            violations: self.tracker().sweep(),
            purged_counters: self.purge_expired_windows(),
        }
    }

    /// Spawn a task that calls [`RateLimiter::run_maintenance`] every
    /// `interval` until the returned handle is shut down or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let limiter = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; nothing can have expired yet.
            ticker.tick().await;

            info!(interval = ?interval, "Rate limit maintenance started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = limiter.run_maintenance();
                        if report.violations.removed > 0 || report.purged_counters > 0 {
                            info!(
                                scanned = report.violations.scanned,
                                expired_violations = report.violations.expired,
                                removed_keys = report.violations.removed,
                                purged_counters = report.purged_counters,
                                "Rate limit maintenance completed"
                            );
                        } else {
                            debug!(
                                scanned = report.violations.scanned,
                                "Rate limit maintenance completed, nothing to remove"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Rate limit maintenance shutting down");
                            break;
                        }
                    }
                }
            }
        });

        MaintenanceHandle { shutdown_tx, task }
    }
}
