//! Runtime surface: status/submit API and the tick driver.

pub mod api;
pub mod driver;

pub use api::{
    charge, discharge, health, power_readings, request_status, submit, system_status, Health,
    PowerReadings, RequestStatusResponse, SubmitResponse, SystemStatus,
};
pub use driver::SchedulerHandle;
