//! Configuration models for the scheduler, its backends, and timeouts.

pub mod app;

pub use app::{
    AppConfig, CalibrationConfig, CommandGatewayConfig, GatewayConfig, MeterPowerConfig,
    PowerSourceConfig, SchedulerConfig, SimulatedGatewayConfig, SimulatedPowerConfig,
    SolarCurve, StorageConfig, CONFIG_PATH_ENV,
};
