//! Power telemetry contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;

/// Identifies which power source variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    /// Simulated battery and solar trajectory.
    Simulated,
    /// Physical power meter.
    Meter,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => f.write_str("simulated"),
            Self::Meter => f.write_str("meter"),
        }
    }
}

/// A single normalized power reading. Never mutated after creation, except
/// that a cached copy may be re-issued with `stale = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSnapshot {
    /// Sample time (ms since epoch).
    pub timestamp_ms: u64,
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Instantaneous system draw in watts.
    pub power_watts: f64,
    /// Battery state of charge, clamped to `[0, 100]`.
    pub battery_level_pct: f64,
    /// Solar input in watts, never negative.
    pub solar_output_watts: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Source that produced the reading.
    pub source_tag: MonitorType,
    /// Set when this is a cached reading reused after a sampling failure.
    pub stale: bool,
}

impl PowerSnapshot {
    /// Build a fresh snapshot, clamping battery and solar to their domains.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp_ms: u64,
        voltage: f64,
        current: f64,
        power_watts: f64,
        battery_level_pct: f64,
        solar_output_watts: f64,
        temperature: f64,
        source_tag: MonitorType,
    ) -> Self {
        Self {
            timestamp_ms,
            voltage,
            current,
            power_watts,
            battery_level_pct: battery_level_pct.clamp(0.0, 100.0),
            solar_output_watts: solar_output_watts.max(0.0),
            temperature,
            source_tag,
            stale: false,
        }
    }

    /// Copy of this reading marked as stale.
    #[must_use]
    pub fn as_stale(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }
}

/// Provider of power and battery telemetry.
///
/// Implementations may block on I/O; the scheduler bounds every call with a
/// timeout and treats expiry like [`SchedulerError::SourceUnavailable`].
#[async_trait]
pub trait PowerSource: Send + Sync {
    /// Produce a reading stamped `now_ms`, or fail with `SourceUnavailable`.
    async fn sample(&self, now_ms: u64) -> Result<PowerSnapshot, SchedulerError>;

    /// Variant tag reported in power readings.
    fn monitor_type(&self) -> MonitorType;

    /// Told when inference starts and stops. Sources that model their own
    /// load use it; measured sources ignore it.
    fn set_processing(&self, _active: bool) {}
}

/// Fraction of peak solar output expected at `hour`: zero at night, rising
/// linearly from 06:00 to a peak at noon and back to zero at 18:00.
pub fn daylight_factor(hour: u8) -> f64 {
    if (6..=18).contains(&hour) {
        1.0 - (f64::from(hour) - 12.0).abs() / 6.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_clamps_domains() {
        let snap = PowerSnapshot::new(1, 4.0, 0.4, 2.0, 140.0, -3.0, 25.0, MonitorType::Simulated);
        assert!((snap.battery_level_pct - 100.0).abs() < f64::EPSILON);
        assert!(snap.solar_output_watts.abs() < f64::EPSILON);
        assert!(!snap.stale);
    }

    #[test]
    fn test_daylight_factor_peaks_at_noon() {
        assert!((daylight_factor(12) - 1.0).abs() < f64::EPSILON);
        assert!((daylight_factor(9) - 0.5).abs() < f64::EPSILON);
        assert!(daylight_factor(6).abs() < f64::EPSILON);
        assert!(daylight_factor(18).abs() < f64::EPSILON);
        assert!(daylight_factor(2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_as_stale_keeps_reading() {
        let snap = PowerSnapshot::new(1, 4.0, 0.4, 2.0, 55.0, 10.0, 25.0, MonitorType::Meter);
        let stale = snap.as_stale();
        assert!(stale.stale);
        assert_eq!(stale.timestamp_ms, snap.timestamp_ms);
        assert_eq!(MonitorType::Meter.to_string(), "meter");
    }
}
