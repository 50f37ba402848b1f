//! Request model and lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a request.
///
/// Transitions only move forward: `Queued -> Processing -> Completed | Failed`.
/// The single exception is startup reconciliation, which returns orphaned
/// `Processing` requests to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for power and for its turn.
    Queued,
    /// Currently executing on the processor gateway.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl RequestStatus {
    /// Whether the request has reached a final state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A single inference request as persisted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier.
    pub id: RequestId,
    /// Prompt text supplied by the caller.
    pub prompt: String,
    /// Submission time (ms since epoch).
    pub submitted_at_ms: u64,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Output produced on completion.
    pub result: Option<String>,
    /// Error recorded on failure.
    pub error: Option<String>,
    /// Time processing started (ms since epoch).
    pub started_at_ms: Option<u64>,
    /// Time the request reached a terminal state (ms since epoch).
    pub completed_at_ms: Option<u64>,
    /// Ordering key among queued requests; lower runs first.
    pub queue_seq: i64,
}

impl Request {
    /// Build a new queued request.
    pub fn queued(prompt: impl Into<String>, submitted_at_ms: u64, queue_seq: i64) -> Self {
        Self {
            id: RequestId::new(),
            prompt: prompt.into(),
            submitted_at_ms,
            status: RequestStatus::Queued,
            result: None,
            error: None,
            started_at_ms: None,
            completed_at_ms: None,
            queue_seq,
        }
    }
}
