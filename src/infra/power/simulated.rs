//! Simulated battery and solar power source.
//!
//! Between samples the battery integrates `solar - draw` over the elapsed
//! tick time against `battery_capacity_wh`. Draw is the idle consumption, or
//! the processing consumption while the scheduler reports a request in
//! flight. Solar input is constant or follows the daylight curve, optionally
//! scaled by random cloud cover. [`charge`] and [`discharge`] move the level
//! directly, for tests and demos.
//!
//! [`charge`]: SimulatedPowerSource::charge
//! [`discharge`]: SimulatedPowerSource::discharge

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{SimulatedPowerConfig, SolarCurve};
use crate::core::{daylight_factor, MonitorType, PowerSnapshot, PowerSource, SchedulerError};
use crate::util::clock::{hour_of_day, ms_to_secs};

/// Li-ion cell voltage range used to derive a plausible voltage.
const CELL_EMPTY_VOLTS: f64 = 3.7;
const CELL_SPAN_VOLTS: f64 = 0.8;
const IDLE_CURRENT_AMPS: f64 = 0.4;
const PROCESSING_CURRENT_AMPS: f64 = 1.0;
const AMBIENT_CELSIUS: f64 = 25.0;
/// Range of the random cloud factor applied to daylight input.
const CLOUD_FACTOR: std::ops::RangeInclusive<f64> = 0.7..=1.0;

struct SimState {
    battery_pct: f64,
    last_sample_ms: Option<u64>,
    processing: bool,
}

/// Simulated power source.
pub struct SimulatedPowerSource {
    config: SimulatedPowerConfig,
    state: Mutex<SimState>,
}

impl SimulatedPowerSource {
    /// Create a source starting at `config.initial_battery_pct`.
    pub fn new(config: SimulatedPowerConfig) -> Self {
        let initial = config.initial_battery_pct.clamp(0.0, 100.0);
        Self {
            config,
            state: Mutex::new(SimState {
                battery_pct: initial,
                last_sample_ms: None,
                processing: false,
            }),
        }
    }

    /// Create a source with default parameters at the given battery level.
    pub fn with_battery(battery_pct: f64) -> Self {
        Self::new(SimulatedPowerConfig {
            initial_battery_pct: battery_pct,
            ..SimulatedPowerConfig::default()
        })
    }

    /// Raise the battery level by `amount_pct`, clamped at 100. Returns the new level.
    pub fn charge(&self, amount_pct: f64) -> f64 {
        let mut state = self.state.lock();
        state.battery_pct = (state.battery_pct + amount_pct.max(0.0)).clamp(0.0, 100.0);
        tracing::debug!(battery_pct = state.battery_pct, "simulated charge");
        state.battery_pct
    }

    /// Lower the battery level by `amount_pct`, clamped at 0. Returns the new level.
    pub fn discharge(&self, amount_pct: f64) -> f64 {
        let mut state = self.state.lock();
        state.battery_pct = (state.battery_pct - amount_pct.max(0.0)).clamp(0.0, 100.0);
        tracing::debug!(battery_pct = state.battery_pct, "simulated discharge");
        state.battery_pct
    }

    /// Current battery level.
    pub fn battery_level(&self) -> f64 {
        self.state.lock().battery_pct
    }

    /// Whether the source currently models a processing load.
    pub fn is_processing(&self) -> bool {
        self.state.lock().processing
    }

    fn solar_watts(&self, now_ms: u64) -> f64 {
        match self.config.solar_curve {
            SolarCurve::Constant => self.config.solar_watts,
            SolarCurve::Daylight => {
                let factor = daylight_factor(hour_of_day(now_ms));
                let cloud = if self.config.cloud_cover && factor > 0.0 {
                    rand::random_range(CLOUD_FACTOR)
                } else {
                    1.0
                };
                self.config.solar_watts * factor * cloud
            }
        }
    }

    const fn draw_watts(&self, processing: bool) -> f64 {
        if processing {
            self.config.processing_consumption_watts
        } else {
            self.config.base_consumption_watts
        }
    }
}

#[async_trait]
impl PowerSource for SimulatedPowerSource {
    async fn sample(&self, now_ms: u64) -> Result<PowerSnapshot, SchedulerError> {
        let solar = self.solar_watts(now_ms);
        let mut state = self.state.lock();
        let draw = self.draw_watts(state.processing);

        if let Some(last) = state.last_sample_ms {
            let hours = ms_to_secs(now_ms.saturating_sub(last)) / 3600.0;
            let delta_pct = (solar - draw) * hours / self.config.battery_capacity_wh * 100.0;
            state.battery_pct = (state.battery_pct + delta_pct).clamp(0.0, 100.0);
        }
        state.last_sample_ms = Some(state.last_sample_ms.map_or(now_ms, |last| last.max(now_ms)));

        let level = state.battery_pct;
        state.battery_pct = (level + self.config.drift_per_sample_pct).clamp(0.0, 100.0);
        let current = if state.processing {
            PROCESSING_CURRENT_AMPS
        } else {
            IDLE_CURRENT_AMPS
        };
        drop(state);

        Ok(PowerSnapshot::new(
            now_ms,
            (level / 100.0).mul_add(CELL_SPAN_VOLTS, CELL_EMPTY_VOLTS),
            current,
            draw,
            level,
            solar,
            AMBIENT_CELSIUS,
            MonitorType::Simulated,
        ))
    }

    fn monitor_type(&self) -> MonitorType {
        MonitorType::Simulated
    }

    fn set_processing(&self, active: bool) {
        self.state.lock().processing = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 3_600_000;

    fn night_source(battery_pct: f64) -> SimulatedPowerSource {
        SimulatedPowerSource::new(SimulatedPowerConfig {
            initial_battery_pct: battery_pct,
            solar_watts: 0.0,
            ..SimulatedPowerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_sample_reports_battery() {
        let source = SimulatedPowerSource::with_battery(50.0);
        let snap = source.sample(1_000).await.unwrap();
        assert!((snap.battery_level_pct - 50.0).abs() < 1e-9);
        assert!((snap.voltage - 4.1).abs() < 1e-9);
        assert_eq!(snap.timestamp_ms, 1_000);
        assert_eq!(snap.source_tag, MonitorType::Simulated);
        assert!(!snap.stale);
    }

    #[test]
    fn test_charge_and_discharge_clamp() {
        let source = SimulatedPowerSource::with_battery(90.0);
        assert!((source.charge(30.0) - 100.0).abs() < 1e-9);
        assert!((source.discharge(150.0)).abs() < 1e-9);
        // Negative amounts are ignored rather than inverting the operation.
        assert!((source.charge(-5.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_drift_applies_after_each_sample() {
        let source = SimulatedPowerSource::new(SimulatedPowerConfig {
            initial_battery_pct: 10.0,
            drift_per_sample_pct: 5.0,
            ..SimulatedPowerConfig::default()
        });
        let first = source.sample(0).await.unwrap();
        let second = source.sample(0).await.unwrap();
        assert!((first.battery_level_pct - 10.0).abs() < 1e-9);
        assert!((second.battery_level_pct - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_processing_draw_discharges_battery() {
        let source = night_source(100.0);
        let idle = source.sample(0).await.unwrap();
        assert!((idle.power_watts - 2.0).abs() < 1e-9);
        assert!((idle.current - 0.4).abs() < 1e-9);

        source.set_processing(true);
        assert!(source.is_processing());
        // 5 W for one hour out of 37 Wh.
        let busy = source.sample(HOUR_MS).await.unwrap();
        assert!((busy.power_watts - 5.0).abs() < 1e-9);
        assert!((busy.current - 1.0).abs() < 1e-9);
        assert!((busy.battery_level_pct - (100.0 - 500.0 / 37.0)).abs() < 1e-9);

        source.set_processing(false);
        // 2 W idle for the next hour.
        let rested = source.sample(2 * HOUR_MS).await.unwrap();
        let expected = 100.0 - 500.0 / 37.0 - 200.0 / 37.0;
        assert!((rested.battery_level_pct - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_solar_surplus_charges_battery() {
        let source = SimulatedPowerSource::with_battery(50.0);
        source.sample(0).await.unwrap();
        // 15 W in, 2 W out for one hour.
        let snap = source.sample(HOUR_MS).await.unwrap();
        assert!((snap.battery_level_pct - (50.0 + 1_300.0 / 37.0)).abs() < 1e-9);
        assert!((snap.solar_output_watts - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_daylight_curve_follows_hour() {
        let source = SimulatedPowerSource::new(SimulatedPowerConfig {
            solar_watts: 30.0,
            solar_curve: SolarCurve::Daylight,
            ..SimulatedPowerConfig::default()
        });
        let noon = source.sample(12 * HOUR_MS).await.unwrap();
        assert!((noon.solar_output_watts - 30.0).abs() < 1e-9);
        let morning = source.sample(9 * HOUR_MS + 24 * HOUR_MS).await.unwrap();
        assert!((morning.solar_output_watts - 15.0).abs() < 1e-9);
        let night = source.sample(2 * HOUR_MS + 48 * HOUR_MS).await.unwrap();
        assert!(night.solar_output_watts.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cloud_cover_stays_in_range() {
        let source = SimulatedPowerSource::new(SimulatedPowerConfig {
            solar_watts: 30.0,
            solar_curve: SolarCurve::Daylight,
            cloud_cover: true,
            ..SimulatedPowerConfig::default()
        });
        for day in 0..50 {
            let snap = source.sample(12 * HOUR_MS + day * 24 * HOUR_MS).await.unwrap();
            assert!((21.0..=30.0).contains(&snap.solar_output_watts));
        }
        let night = source.sample(51 * 24 * HOUR_MS).await.unwrap();
        assert!(night.solar_output_watts.abs() < 1e-9);
    }
}
