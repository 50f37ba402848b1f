//! Completion-time estimation for queued requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::clock::secs_to_duration;

/// Estimated completion of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionEstimate {
    /// Enough history exists to estimate.
    Known {
        /// Expected wait from `computed_at_ms`.
        expected_wait_ms: u64,
        /// Absolute estimated completion time (ms since epoch).
        estimated_completion_ms: u64,
    },
    /// No duration history or the predicate has never been armed.
    Unknown,
}

impl CompletionEstimate {
    /// Build an estimate for `position` at time `now_ms`.
    pub fn compute(
        position: usize,
        avg_duration_secs: Option<f64>,
        availability_fraction: f64,
        now_ms: u64,
    ) -> Self {
        match expected_wait(position, avg_duration_secs, availability_fraction) {
            Some(wait) => {
                let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                Self::Known {
                    expected_wait_ms: wait_ms,
                    estimated_completion_ms: now_ms.saturating_add(wait_ms),
                }
            }
            None => Self::Unknown,
        }
    }

    /// Absolute completion time, if known.
    pub const fn completion_ms(&self) -> Option<u64> {
        match self {
            Self::Known {
                estimated_completion_ms,
                ..
            } => Some(*estimated_completion_ms),
            Self::Unknown => None,
        }
    }
}

/// `position × avg_duration / availability`, or `None` when the duty cycle is
/// zero or no duration has been observed.
#[allow(clippy::cast_precision_loss)]
pub fn expected_wait(
    position: usize,
    avg_duration_secs: Option<f64>,
    availability_fraction: f64,
) -> Option<Duration> {
    let avg = avg_duration_secs.filter(|d| d.is_finite() && *d >= 0.0)?;
    if !availability_fraction.is_finite() || availability_fraction <= 0.0 {
        return None;
    }
    let availability = availability_fraction.min(1.0);
    Some(secs_to_duration(position as f64 * avg / availability))
}
