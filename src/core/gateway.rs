//! Processor gateway contract: submit a long-running inference, poll for it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;

/// Handle identifying one submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Outcome of a non-blocking poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollStatus {
    /// Still running.
    Pending,
    /// Finished with output.
    Ready(String),
    /// Finished with an error.
    Failed(String),
}

/// Single-slot provider of the inference capability.
///
/// At most one task may be outstanding. Submitting while one is outstanding
/// fails with [`SchedulerError::GatewayBusy`]; the scheduler never does this
/// on purpose. A task stops being outstanding once a poll has returned
/// `Ready` or `Failed` for it.
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    /// Start a task for `prompt`.
    async fn submit(&self, prompt: &str) -> Result<TaskHandle, SchedulerError>;

    /// Check on a task without blocking. May be called repeatedly.
    async fn poll(&self, handle: TaskHandle) -> Result<PollStatus, SchedulerError>;

    /// Short variant name for logs and status.
    fn kind(&self) -> &'static str;
}
