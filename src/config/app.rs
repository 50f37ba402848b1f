//! Scheduler and backend configuration structures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "SOLAR_SCHEDULER_CONFIG";

/// Control-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between ticks.
    pub tick_interval_ms: u64,
    /// Battery level at which dispatch arms.
    pub dispatch_threshold_pct: f64,
    /// Battery level below which dispatch disarms.
    pub resume_threshold_pct: f64,
    /// Age after which a cached power reading no longer counts.
    pub max_staleness_ms: u64,
    /// Upper bound on one power sample.
    pub sample_timeout_ms: u64,
    /// Upper bound on one gateway poll.
    pub poll_timeout_ms: u64,
    /// Trailing window for the availability duty cycle.
    pub availability_window_ms: u64,
    /// Draw subtracted from readings when integrating request energy.
    pub idle_baseline_watts: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            dispatch_threshold_pct: 80.0,
            resume_threshold_pct: 20.0,
            max_staleness_ms: 60_000,
            sample_timeout_ms: 2_000,
            poll_timeout_ms: 2_000,
            availability_window_ms: 24 * 60 * 60 * 1000,
            idle_baseline_watts: 2.0,
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a `Duration`.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Power sample timeout as a `Duration`.
    pub const fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    /// Gateway poll timeout as a `Duration`.
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Validate control-loop values.
    pub fn validate(&self) -> Result<(), String> {
        let pct = 0.0..=100.0;
        if !pct.contains(&self.dispatch_threshold_pct) {
            return Err("dispatch_threshold_pct must be within 0..=100".into());
        }
        if !pct.contains(&self.resume_threshold_pct) {
            return Err("resume_threshold_pct must be within 0..=100".into());
        }
        if self.resume_threshold_pct >= self.dispatch_threshold_pct {
            return Err("resume_threshold_pct must be below dispatch_threshold_pct".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.sample_timeout_ms == 0 || self.poll_timeout_ms == 0 {
            return Err("timeouts must be greater than 0".into());
        }
        if self.availability_window_ms == 0 {
            return Err("availability_window_ms must be greater than 0".into());
        }
        if !(self.idle_baseline_watts.is_finite() && self.idle_baseline_watts >= 0.0) {
            return Err("idle_baseline_watts must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Calibrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// EWMA weight of the newest sample.
    pub alpha: f64,
    /// Recent samples retained for inspection.
    pub history_len: usize,
    /// Optional starting duration average in seconds.
    pub seed_duration_secs: Option<f64>,
    /// Optional starting energy average in watt-hours.
    pub seed_energy_wh: Option<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            history_len: 100,
            seed_duration_secs: None,
            seed_energy_wh: None,
        }
    }
}

impl CalibrationConfig {
    /// Validate calibrator values.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err("alpha must be within (0, 1]".into());
        }
        if self.seed_duration_secs.is_some_and(|d| !(d.is_finite() && d >= 0.0)) {
            return Err("seed_duration_secs must be a non-negative number".into());
        }
        if self.seed_energy_wh.is_some_and(|e| !(e.is_finite() && e >= 0.0)) {
            return Err("seed_energy_wh must be a non-negative number".into());
        }
        Ok(())
    }
}

/// Shape of simulated solar input over the day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolarCurve {
    /// `solar_watts` around the clock.
    #[default]
    Constant,
    /// `solar_watts` at noon, scaled by the daylight factor of the hour.
    Daylight,
}

/// Simulated power source parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedPowerConfig {
    /// Starting battery level.
    pub initial_battery_pct: f64,
    /// Solar input in watts; the noon peak under the daylight curve.
    pub solar_watts: f64,
    /// How solar input varies with the hour of day.
    pub solar_curve: SolarCurve,
    /// Scale daylight input by a random 0.7 to 1.0 cloud factor per sample.
    pub cloud_cover: bool,
    /// System draw while idle.
    pub base_consumption_watts: f64,
    /// System draw while a request is processing.
    pub processing_consumption_watts: f64,
    /// Battery capacity the charge model integrates against.
    pub battery_capacity_wh: f64,
    /// Deterministic change applied after every sample (may be negative).
    pub drift_per_sample_pct: f64,
}

impl Default for SimulatedPowerConfig {
    fn default() -> Self {
        Self {
            initial_battery_pct: 75.0,
            solar_watts: 15.0,
            solar_curve: SolarCurve::Constant,
            cloud_cover: false,
            base_consumption_watts: 2.0,
            processing_consumption_watts: 5.0,
            battery_capacity_wh: 37.0,
            drift_per_sample_pct: 0.0,
        }
    }
}

impl SimulatedPowerConfig {
    /// Validate simulation parameters.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.battery_capacity_wh.is_finite() && self.battery_capacity_wh > 0.0) {
            return Err("battery_capacity_wh must be positive".into());
        }
        let watts = [
            ("solar_watts", self.solar_watts),
            ("base_consumption_watts", self.base_consumption_watts),
            ("processing_consumption_watts", self.processing_consumption_watts),
        ];
        for (name, value) in watts {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// Meter-backed power source parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterPowerConfig {
    /// Cell voltage treated as empty.
    pub min_cell_voltage: f64,
    /// Cell voltage treated as full.
    pub max_cell_voltage: f64,
    /// Draw reported while idle; the meter measures solar input.
    pub base_consumption_watts: f64,
}

impl Default for MeterPowerConfig {
    fn default() -> Self {
        Self {
            min_cell_voltage: 3.3,
            max_cell_voltage: 4.2,
            base_consumption_watts: 2.0,
        }
    }
}

/// Power source selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerSourceConfig {
    /// Simulated battery and solar.
    Simulated(SimulatedPowerConfig),
    /// Physical meter; the reader is supplied at build time.
    Meter(MeterPowerConfig),
}

impl Default for PowerSourceConfig {
    fn default() -> Self {
        Self::Simulated(SimulatedPowerConfig::default())
    }
}

/// Simulated gateway parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedGatewayConfig {
    /// Artificial execution delay.
    pub delay_ms: u64,
    /// Keyword to canned-response table, matched case-insensitively.
    pub canned: HashMap<String, String>,
    /// Prompts containing this marker fail.
    pub failure_marker: Option<String>,
}

impl Default for SimulatedGatewayConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            canned: HashMap::new(),
            failure_marker: None,
        }
    }
}

/// External command gateway parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandGatewayConfig {
    /// Program to run.
    pub program: PathBuf,
    /// Arguments placed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Processor gateway selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// Simulated delay with canned or echo output.
    Simulated(SimulatedGatewayConfig),
    /// External program run on a dedicated worker thread.
    Command(CommandGatewayConfig),
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::Simulated(SimulatedGatewayConfig::default())
    }
}

/// Persistence selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Volatile storage for development and tests.
    #[default]
    InMemory,
    /// Journal and state files under `dir`.
    File {
        /// Directory holding the request journal and calibration state.
        dir: PathBuf,
    },
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Control loop.
    pub scheduler: SchedulerConfig,
    /// Calibrator.
    pub calibration: CalibrationConfig,
    /// Power source variant.
    pub power: PowerSourceConfig,
    /// Processor gateway variant.
    pub gateway: GatewayConfig,
    /// Storage backend.
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.calibration
            .validate()
            .map_err(|e| format!("calibration invalid: {e}"))?;
        if let PowerSourceConfig::Meter(meter) = &self.power {
            if meter.min_cell_voltage >= meter.max_cell_voltage {
                return Err("power invalid: min_cell_voltage must be below max_cell_voltage".into());
            }
        }
        if let PowerSourceConfig::Simulated(sim) = &self.power {
            sim.validate().map_err(|e| format!("power invalid: {e}"))?;
        }
        if let GatewayConfig::Command(cmd) = &self.gateway {
            if cmd.program.as_os_str().is_empty() {
                return Err("gateway invalid: program must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment.
    ///
    /// Reads `.env` if present, then the JSON file named by
    /// `SOLAR_SCHEDULER_CONFIG` (defaults otherwise), then applies
    /// `SOLAR_SCHEDULER_TICK_MS`, `SOLAR_SCHEDULER_DISPATCH_PCT` and
    /// `SOLAR_SCHEDULER_RESUME_PCT` overrides.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg: Self = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => Self::default(),
        };
        if let Some(tick) = env_override::<u64>("SOLAR_SCHEDULER_TICK_MS")? {
            cfg.scheduler.tick_interval_ms = tick;
        }
        if let Some(pct) = env_override::<f64>("SOLAR_SCHEDULER_DISPATCH_PCT")? {
            cfg.scheduler.dispatch_threshold_pct = pct;
        }
        if let Some(pct) = env_override::<f64>("SOLAR_SCHEDULER_RESUME_PCT")? {
            cfg.scheduler.resume_threshold_pct = pct;
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_override<T>(key: &str) -> AppResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(None),
    }
}
