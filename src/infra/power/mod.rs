//! Power source backends.

pub mod meter;
pub mod simulated;

pub use meter::{MeterPowerSource, MeterReader, MeterReading};
pub use simulated::SimulatedPowerSource;
