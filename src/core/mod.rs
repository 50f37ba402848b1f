//! Core scheduling abstractions: request lifecycle, power and gateway
//! contracts, calibration, and the control loop.

pub mod admission;
pub mod audit;
pub mod calibrator;
pub mod error;
pub mod estimate;
pub mod executor;
pub mod gateway;
pub mod power;
pub mod request;
pub mod request_queue;
pub mod scheduler;

pub use admission::AdmissionGate;
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use calibrator::{
    ewma, integrate_energy_wh, AvailabilityWindow, CalibrationSample, CalibrationState,
    CalibrationStore, Calibrator, Estimates, HourlySolar, SolarProfile,
};
pub use error::{AppResult, SchedulerError};
pub use estimate::{expected_wait, CompletionEstimate};
pub use executor::InferenceExecutor;
pub use gateway::{PollStatus, ProcessorGateway, TaskHandle};
pub use power::{daylight_factor, MonitorType, PowerSnapshot, PowerSource};
pub use request::{Request, RequestId, RequestStatus};
pub use request_queue::{RequestQueue, RequestStore};
pub use scheduler::{PowerView, Scheduler, SchedulerContext, TickOutcome, TickReport};
