//! Periodic tick driver.
//!
//! Runs the scheduler on a tokio interval until asked to stop, then performs
//! a final durable flush.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::{Scheduler, SchedulerContext, SchedulerError, TickOutcome};
use crate::util::clock::now_ms;

/// Handle to a running control loop.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), SchedulerError>>,
    context: Arc<SchedulerContext>,
}

impl SchedulerHandle {
    /// Spawn the control loop on the current tokio runtime.
    ///
    /// The loop exits on shutdown or on the first fatal error.
    pub fn spawn(mut scheduler: Scheduler) -> Self {
        let context = scheduler.context();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = scheduler.config().tick_interval();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis(), "scheduler loop started");

            let outcome = loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.tick(now_ms()).await {
                            Ok(report) if report.outcome != TickOutcome::Idle => {
                                debug!(outcome = ?report.outcome, armed = ?report.armed, "tick");
                            }
                            Ok(_) => {}
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "fatal error, stopping scheduler loop");
                                break Err(e);
                            }
                            Err(e) => warn!(error = %e, "tick failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break Ok(());
                        }
                    }
                }
            };

            let flushed = scheduler.context().flush();
            if let Err(e) = &flushed {
                error!(error = %e, "final flush failed");
            }
            info!("scheduler loop stopped");
            outcome.and(flushed)
        });

        Self {
            shutdown_tx,
            join,
            context,
        }
    }

    /// Shared context of the running scheduler.
    pub fn context(&self) -> Arc<SchedulerContext> {
        Arc::clone(&self.context)
    }

    /// Whether the loop has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for the final flush.
    ///
    /// Returns the fatal error that stopped the loop early, if any.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        // The loop may already have exited and dropped its receiver.
        let _ = self.shutdown_tx.send(true);
        self.join
            .await
            .map_err(|e| SchedulerError::Backend(format!("scheduler task failed: {e}")))?
    }
}
