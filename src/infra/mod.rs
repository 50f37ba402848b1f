//! Infrastructure adapters: storage backends, power sources, and processor
//! gateways.

pub mod calibration;
pub mod gateway;
pub mod power;
pub mod queue;

pub use calibration::{InMemoryCalibrationStore, JsonCalibrationStore};
pub use gateway::{CommandExecutor, SimulatedGateway, WorkerGateway};
pub use power::{MeterPowerSource, MeterReader, MeterReading, SimulatedPowerSource};
pub use queue::{InMemoryRequestStore, JsonlRequestStore};
