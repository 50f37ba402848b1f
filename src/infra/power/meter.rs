//! Power source backed by a physical meter.
//!
//! The byte-level protocol of any particular meter lives behind
//! [`MeterReader`]; this module turns raw readings into normalized snapshots.
//! Battery level is estimated from cell voltage and the measured power is
//! treated as solar input.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::MeterPowerConfig;
use crate::core::{MonitorType, PowerSnapshot, PowerSource, SchedulerError};

/// One raw reading from a meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Measured power in watts (solar input).
    pub power_watts: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// System draw, for meters that also measure the load side.
    pub load_watts: Option<f64>,
}

/// Blocking reader for one physical meter. One call yields one reading.
pub trait MeterReader: Send {
    /// Read a sample; may block on I/O.
    fn read(&mut self) -> std::io::Result<MeterReading>;
}

/// Battery percentage from cell voltage, linear between `min` and `max`.
pub fn battery_from_voltage(voltage: f64, min_voltage: f64, max_voltage: f64) -> f64 {
    let clamped = voltage.clamp(min_voltage, max_voltage);
    let pct = (clamped - min_voltage) / (max_voltage - min_voltage) * 100.0;
    (pct * 10.0).round() / 10.0
}

/// Meter-backed power source.
pub struct MeterPowerSource {
    reader: Arc<Mutex<Box<dyn MeterReader>>>,
    config: MeterPowerConfig,
}

impl MeterPowerSource {
    /// Wrap a reader.
    pub fn new(reader: Box<dyn MeterReader>, config: MeterPowerConfig) -> Self {
        Self {
            reader: Arc::new(Mutex::new(reader)),
            config,
        }
    }
}

#[async_trait]
impl PowerSource for MeterPowerSource {
    async fn sample(&self, now_ms: u64) -> Result<PowerSnapshot, SchedulerError> {
        let reader = Arc::clone(&self.reader);
        let reading = tokio::task::spawn_blocking(move || reader.lock().read())
            .await
            .map_err(|e| SchedulerError::SourceUnavailable(format!("meter task failed: {e}")))?
            .map_err(|e| SchedulerError::SourceUnavailable(e.to_string()))?;

        let battery = battery_from_voltage(
            reading.voltage,
            self.config.min_cell_voltage,
            self.config.max_cell_voltage,
        );
        Ok(PowerSnapshot::new(
            now_ms,
            reading.voltage,
            reading.current,
            reading.load_watts.unwrap_or(self.config.base_consumption_watts),
            battery,
            reading.power_watts,
            reading.temperature,
            MonitorType::Meter,
        ))
    }

    fn monitor_type(&self) -> MonitorType {
        MonitorType::Meter
    }
}
