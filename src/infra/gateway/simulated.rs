//! Simulated processor gateway with an artificial delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::SimulatedGatewayConfig;
use crate::core::{PollStatus, ProcessorGateway, SchedulerError, TaskHandle};

struct Outstanding {
    handle: TaskHandle,
    ready_at: Instant,
    outcome: PollStatus,
}

/// Gateway that answers after a fixed delay with canned or echoed output.
pub struct SimulatedGateway {
    delay: Duration,
    canned: Vec<(String, String)>,
    failure_marker: Option<String>,
    outstanding: Mutex<Option<Outstanding>>,
    next_handle: AtomicU64,
}

impl SimulatedGateway {
    /// Build from configuration.
    pub fn new(config: SimulatedGatewayConfig) -> Self {
        let mut canned: Vec<(String, String)> = config
            .canned
            .into_iter()
            .map(|(keyword, response)| (keyword.to_lowercase(), response))
            .collect();
        // HashMap order is random; keep keyword matching deterministic.
        canned.sort();
        Self {
            delay: Duration::from_millis(config.delay_ms),
            canned,
            failure_marker: config.failure_marker,
            outstanding: Mutex::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Gateway that echoes prompts after `delay`.
    pub fn echo(delay: Duration) -> Self {
        Self::new(SimulatedGatewayConfig {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ..SimulatedGatewayConfig::default()
        })
    }

    /// Whether a task is outstanding.
    pub fn is_busy(&self) -> bool {
        self.outstanding.lock().is_some()
    }

    fn respond(&self, prompt: &str) -> PollStatus {
        if let Some(marker) = &self.failure_marker {
            if prompt.contains(marker.as_str()) {
                return PollStatus::Failed(format!("simulated failure for prompt containing {marker:?}"));
            }
        }
        let lowered = prompt.to_lowercase();
        self.canned
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map_or_else(
                || PollStatus::Ready(format!("echo: {prompt}")),
                |(_, response)| PollStatus::Ready(response.clone()),
            )
    }
}

#[async_trait]
impl ProcessorGateway for SimulatedGateway {
    async fn submit(&self, prompt: &str) -> Result<TaskHandle, SchedulerError> {
        let mut outstanding = self.outstanding.lock();
        if outstanding.is_some() {
            return Err(SchedulerError::GatewayBusy);
        }
        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        *outstanding = Some(Outstanding {
            handle,
            ready_at: Instant::now() + self.delay,
            outcome: self.respond(prompt),
        });
        tracing::debug!(%handle, delay_ms = self.delay.as_millis(), "simulated task submitted");
        Ok(handle)
    }

    async fn poll(&self, handle: TaskHandle) -> Result<PollStatus, SchedulerError> {
        let mut outstanding = self.outstanding.lock();
        let ready_at = match outstanding.as_ref() {
            Some(task) if task.handle == handle => task.ready_at,
            _ => return Err(SchedulerError::UnknownHandle(handle.0)),
        };
        if Instant::now() < ready_at {
            return Ok(PollStatus::Pending);
        }
        Ok(outstanding
            .take()
            .map_or(PollStatus::Pending, |task| task.outcome))
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }
}
