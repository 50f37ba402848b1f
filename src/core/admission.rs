//! Admission predicate with hysteresis.

use serde::{Deserialize, Serialize};

/// Two-threshold gate on battery level.
///
/// The gate arms when the battery reaches `dispatch_threshold_pct` and stays
/// armed until it drops strictly below `resume_threshold_pct`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionGate {
    dispatch_threshold_pct: f64,
    resume_threshold_pct: f64,
    armed: bool,
    transitions: u64,
}

impl AdmissionGate {
    /// Create a disarmed gate.
    pub const fn new(dispatch_threshold_pct: f64, resume_threshold_pct: f64) -> Self {
        Self {
            dispatch_threshold_pct,
            resume_threshold_pct,
            armed: false,
            transitions: 0,
        }
    }

    /// Feed a battery reading and return whether dispatch is armed.
    pub fn evaluate(&mut self, battery_level_pct: f64) -> bool {
        let next = if self.armed {
            battery_level_pct >= self.resume_threshold_pct
        } else {
            battery_level_pct >= self.dispatch_threshold_pct
        };
        if next != self.armed {
            self.transitions += 1;
            tracing::info!(
                armed = next,
                battery_pct = battery_level_pct,
                "admission gate {}",
                if next { "armed" } else { "disarmed" }
            );
        }
        self.armed = next;
        next
    }

    /// Current state without feeding a reading.
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Number of arm/disarm flips since creation.
    pub const fn transitions(&self) -> u64 {
        self.transitions
    }
}
