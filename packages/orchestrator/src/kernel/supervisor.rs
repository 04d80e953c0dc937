//! Supervisory loop: reap stale workers, then dispatch queued work.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (every loop_interval)
//!     │
//!     ├─► Reap: health_check() → kill(id, "heartbeat timeout")
//!     └─► Dispatch: while has_capacity() → get_next() → spawn()
//! ```
//!
//! Single-threaded by design: each step is individually atomic at the
//! persistence layer, so a crashed tick leaves nothing half-done. Errors
//! are logged and the loop continues to the next sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::domains::work_items::QueueManager;
use crate::domains::workers::WorkerManager;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sleep between ticks.
    pub loop_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(5),
        }
    }
}

/// What a single tick did, for logs and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub reaped: usize,
    pub spawned: usize,
}

/// Background service driving the queue and worker managers.
pub struct Supervisor {
    queue: QueueManager,
    workers: WorkerManager,
    config: SupervisorConfig,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(queue: QueueManager, workers: WorkerManager, config: SupervisorConfig) -> Self {
        Self {
            queue,
            workers,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Request shutdown of the loop.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// One pass of reap + dispatch.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        // Reap workers whose heartbeat went stale.
        match self.workers.health_check().await {
            Ok(stale) => {
                for worker in stale {
                    match self.workers.kill(worker.id, "heartbeat timeout").await {
                        Ok(_) => {
                            warn!(
                                worker_id = %worker.id,
                                last_heartbeat = %worker.last_heartbeat,
                                "reaped stale worker"
                            );
                            summary.reaped += 1;
                        }
                        Err(e) => {
                            error!(worker_id = %worker.id, error = %e, "failed to reap worker")
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "health check failed"),
        }

        // Dispatch while the rate limiter allows. Capacity is re-checked
        // per spawn so cooldown and budget updates take effect mid-tick.
        loop {
            match self.workers.has_capacity().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("at capacity, dispatch deferred");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "capacity check failed");
                    break;
                }
            }

            let item = match self.queue.get_next().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to claim next work item");
                    break;
                }
            };

            match self.workers.spawn(&item).await {
                Ok(worker) => {
                    debug!(worker_id = %worker.id, work_item_id = %item.id, "dispatched");
                    summary.spawned += 1;
                }
                Err(e) => {
                    // spawn() already rolled back and requeued the item.
                    error!(work_item_id = %item.id, error = %e, "spawn failed");
                    break;
                }
            }
        }

        summary
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            loop_interval_ms = self.config.loop_interval.as_millis() as u64,
            "supervisor starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            let summary = self.tick().await;
            if summary.reaped > 0 || summary.spawned > 0 {
                info!(
                    reaped = summary.reaped,
                    spawned = summary.spawned,
                    "supervisor tick"
                );
            }

            tokio::time::sleep(self.config.loop_interval).await;
        }

        info!("supervisor stopped");
        Ok(())
    }

    /// Run until a Ctrl+C signal is received.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });

        self.run().await
    }
}
