//! Request/response models for the collaborator-facing surface.
//!
//! Every function takes the shared [`SchedulerContext`] and an explicit
//! `now_ms`; responses are serde-serializable so an adapter layer can put
//! them on any wire format.

use serde::{Deserialize, Serialize};

use crate::core::{
    AuditAction, CompletionEstimate, HourlySolar, MonitorType, PowerSnapshot, RequestId,
    RequestStatus, SchedulerContext, SchedulerError,
};
use crate::infra::power::SimulatedPowerSource;

/// Hours covered by the solar forecast in [`PowerReadings`].
const FORECAST_HOURS: usize = 24;

/// Response to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Identifier of the new request.
    pub id: RequestId,
    /// Always `queued`.
    pub status: RequestStatus,
    /// Requests ahead of this one at submission.
    pub queue_position: Option<usize>,
}

/// Status of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatusResponse {
    /// Request identifier.
    pub id: RequestId,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Prompt as submitted.
    pub prompt: String,
    /// Requests ahead of this one, while queued.
    pub queue_position: Option<usize>,
    /// Completion estimate while queued; `unknown` when not computable.
    pub estimated_completion: Option<CompletionEstimate>,
    /// Output once completed.
    pub result: Option<String>,
    /// Error once failed.
    pub error: Option<String>,
    /// Submission time (ms since epoch).
    pub submitted_at_ms: u64,
    /// Completion time (ms since epoch).
    pub completed_at_ms: Option<u64>,
}

/// System-wide status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Battery level from the latest reading.
    pub battery_level_pct: Option<f64>,
    /// Solar input from the latest reading.
    pub solar_output_watts: Option<f64>,
    /// Queued requests.
    pub queue_length: usize,
    /// Whether a request is executing.
    pub processing_active: bool,
    /// Whether power is currently known.
    pub power_known: bool,
    /// Admission gate state.
    pub dispatch_armed: bool,
    /// Duty cycle of the admission gate.
    pub availability_fraction: f64,
    /// Calibrated average duration.
    pub avg_duration_secs: Option<f64>,
    /// Calibrated average energy.
    pub avg_energy_wh: Option<f64>,
    /// Time of this status.
    pub timestamp_ms: u64,
}

/// Latest power reading with attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerReadings {
    /// Latest snapshot, possibly stale.
    pub snapshot: Option<PowerSnapshot>,
    /// Draw above the idle baseline while a request is processing.
    pub power_consumption_watts: f64,
    /// Active power source variant.
    pub monitor_type: MonitorType,
    /// Learned solar input for the next day, starting at the current hour.
    pub solar_forecast: Vec<HourlySolar>,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: power is known.
    pub ok: bool,
    /// Queued requests.
    pub queue_length: usize,
    /// Whether a request is executing.
    pub processing_active: bool,
}

/// Accept a prompt. Durable before returning.
pub fn submit(
    ctx: &SchedulerContext,
    prompt: &str,
    now_ms: u64,
) -> Result<SubmitResponse, SchedulerError> {
    if prompt.trim().is_empty() {
        return Err(SchedulerError::EmptyPrompt);
    }
    let id = ctx.queue().enqueue(prompt, now_ms)?;
    ctx.audit(Some(id), AuditAction::Enqueue, now_ms, None);
    Ok(SubmitResponse {
        id,
        status: RequestStatus::Queued,
        queue_position: ctx.queue().position_of(id),
    })
}

/// Status of a request by id.
pub fn request_status(
    ctx: &SchedulerContext,
    id: RequestId,
    now_ms: u64,
) -> Result<RequestStatusResponse, SchedulerError> {
    let request = ctx.queue().get(id).ok_or(SchedulerError::NotFound(id))?;
    let queued = request.status == RequestStatus::Queued;
    Ok(RequestStatusResponse {
        id,
        status: request.status,
        queue_position: if queued { ctx.queue().position_of(id) } else { None },
        estimated_completion: if queued {
            Some(ctx.estimate_for(id, now_ms).unwrap_or(CompletionEstimate::Unknown))
        } else {
            None
        },
        prompt: request.prompt,
        result: request.result,
        error: request.error,
        submitted_at_ms: request.submitted_at_ms,
        completed_at_ms: request.completed_at_ms,
    })
}

/// System-wide status.
pub fn system_status(ctx: &SchedulerContext, now_ms: u64) -> SystemStatus {
    let power = ctx.power_view();
    let estimates = ctx.estimates();
    SystemStatus {
        battery_level_pct: power.snapshot.as_ref().map(|s| s.battery_level_pct),
        solar_output_watts: power.snapshot.as_ref().map(|s| s.solar_output_watts),
        queue_length: ctx.queue().queue_length(),
        processing_active: ctx.queue().processing().is_some(),
        power_known: power.known,
        dispatch_armed: power.armed,
        availability_fraction: ctx.availability_fraction(now_ms),
        avg_duration_secs: estimates.avg_duration_secs,
        avg_energy_wh: estimates.avg_energy_wh,
        timestamp_ms: now_ms,
    }
}

/// Latest power snapshot plus the draw attributable to processing.
pub fn power_readings(ctx: &SchedulerContext) -> PowerReadings {
    let view = ctx.power_view();
    let snapshot = view.snapshot;
    let processing = ctx.queue().processing().is_some();
    let power_consumption_watts = match &snapshot {
        Some(s) if processing => (s.power_watts - ctx.idle_baseline_watts()).max(0.0),
        _ => 0.0,
    };
    PowerReadings {
        snapshot,
        power_consumption_watts,
        monitor_type: ctx.monitor_type(),
        solar_forecast: ctx.solar_forecast(view.updated_at_ms, FORECAST_HOURS),
    }
}

/// Liveness summary.
pub fn health(ctx: &SchedulerContext) -> Health {
    Health {
        ok: ctx.power_view().known,
        queue_length: ctx.queue().queue_length(),
        processing_active: ctx.queue().processing().is_some(),
    }
}

/// Charge the simulated battery. Fails when the active source is not simulated.
pub fn charge(power: Option<&SimulatedPowerSource>, amount_pct: f64) -> Result<f64, SchedulerError> {
    simulated(power).map(|source| source.charge(amount_pct))
}

/// Discharge the simulated battery. Fails when the active source is not simulated.
pub fn discharge(
    power: Option<&SimulatedPowerSource>,
    amount_pct: f64,
) -> Result<f64, SchedulerError> {
    simulated(power).map(|source| source.discharge(amount_pct))
}

fn simulated(power: Option<&SimulatedPowerSource>) -> Result<&SimulatedPowerSource, SchedulerError> {
    power.ok_or_else(|| SchedulerError::Backend("power source is not simulated".into()))
}
