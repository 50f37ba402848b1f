//! Request lifecycle audit trail.
//!
//! Provides a bounded in-memory sink for tests and status pages, and a sink
//! that forwards events to `tracing`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::request::RequestId;

/// Lifecycle action recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Request accepted into the queue.
    Enqueue,
    /// Request handed to the processor gateway.
    Dispatch,
    /// Request finished with a result.
    Complete,
    /// Request finished with an error.
    Fail,
    /// Orphaned request returned to the queue at startup.
    Requeue,
    /// Dispatch skipped because power was unknown or the gateway refused.
    DispatchRefused,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enqueue => "enqueue",
            Self::Dispatch => "dispatch",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Requeue => "requeue",
            Self::DispatchRefused => "dispatch_refused",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Related request, if the event concerns one.
    pub request_id: Option<RequestId>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev. Clones share one buffer.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events with the given action.
    pub fn events_with(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "solar_llm_scheduler::audit",
            action = %event.action,
            request_id = ?event.request_id,
            at_ms = event.created_at_ms,
            detail = event.detail.as_deref().unwrap_or(""),
            "lifecycle event"
        );
    }
}

/// Helper to build an audit event.
pub fn build_audit_event(
    request_id: Option<RequestId>,
    action: AuditAction,
    created_at_ms: u64,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        request_id,
        action,
        created_at_ms,
        detail,
    }
}
