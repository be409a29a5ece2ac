//! Health Monitor
//!
//! Runs a background task that periodically probes every enabled system
//! through the connection manager. Health changes themselves are published
//! by the manager; this task only drives the schedule and logs the outcome.

use crate::connection::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic health checker
pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ConnectionManager>, check_interval: Duration) -> Self {
        Self {
            manager,
            check_interval,
        }
    }

    /// Start the monitoring background task
    ///
    /// The first round runs one full interval after start.
    pub fn start(self) -> HealthMonitorHandle {
        let active = Arc::new(AtomicBool::new(true));
        let running = active.clone();
        let manager = self.manager;
        let period = self.check_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; skip that tick
            ticker.tick().await;

            info!("[HEALTH] Monitoring every {:?}", period);

            loop {
                ticker.tick().await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let results = manager.check_health().await;
                let mut down: Vec<&str> = results
                    .iter()
                    .filter(|(_, reachable)| !**reachable)
                    .map(|(id, _)| id.as_str())
                    .collect();
                down.sort_unstable();

                if down.is_empty() {
                    debug!("[HEALTH] All {} systems reachable", results.len());
                } else {
                    warn!(
                        "[HEALTH] {}/{} systems unreachable: {}",
                        down.len(),
                        results.len(),
                        down.join(", ")
                    );
                }
            }

            info!("[HEALTH] Monitoring stopped");
        });

        HealthMonitorHandle { active, task }
    }
}

/// Handle to stop health monitoring; dropping it stops the task as well
pub struct HealthMonitorHandle {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Stop the periodic checks, interrupting a round in progress
    pub async fn stop(mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
        // Cancellation is the expected outcome here
        let _ = (&mut self.task).await;
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

impl Drop for HealthMonitorHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}
