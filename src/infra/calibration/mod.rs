//! Calibration state backends.

pub mod json;
pub mod memory;

pub use json::JsonCalibrationStore;
pub use memory::InMemoryCalibrationStore;
