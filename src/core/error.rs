//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::request::{RequestId, RequestStatus};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The power source could not produce a fresh reading.
    #[error("power source unavailable: {0}")]
    SourceUnavailable(String),
    /// A task was submitted while another one is still outstanding.
    #[error("processor gateway busy")]
    GatewayBusy,
    /// A lifecycle transition was attempted from the wrong state.
    #[error("invalid transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Request the transition was attempted on.
        id: RequestId,
        /// Status the request was in.
        from: RequestStatus,
        /// Status the caller asked for.
        to: RequestStatus,
    },
    /// No request with this id exists.
    #[error("request not found: {0}")]
    NotFound(RequestId),
    /// The gateway does not know this execution handle.
    #[error("unknown execution handle: {0}")]
    UnknownHandle(u64),
    /// Durable storage failed; the transition may not have been recorded.
    #[error("storage error: {0}")]
    Storage(String),
    /// A bounded operation did not finish in time.
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    /// A submitted prompt was empty.
    #[error("prompt must not be empty")]
    EmptyPrompt,
    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Whether the error must stop the control loop.
    ///
    /// Only storage failures qualify: losing a lifecycle transition would break
    /// the durability and single-in-flight guarantees.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
