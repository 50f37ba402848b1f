//! Power-aware control loop.
//!
//! One [`Scheduler`] drives every admission and dispatch decision. Each
//! [`tick`](Scheduler::tick) samples power, then either polls the in-flight
//! request or, when idle and the admission gate is armed, dispatches the head
//! of the queue. Finally it refreshes completion estimates for every queued
//! request.
//!
//! State that status queries need is published through [`SchedulerContext`],
//! which is shared by `Arc` between the control loop and any number of
//! readers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::admission::AdmissionGate;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::calibrator::{
    integrate_energy_wh, CalibrationSample, CalibrationState, Calibrator, Estimates, HourlySolar,
};
use crate::core::error::SchedulerError;
use crate::core::estimate::CompletionEstimate;
use crate::core::gateway::{PollStatus, ProcessorGateway, TaskHandle};
use crate::core::power::{MonitorType, PowerSnapshot, PowerSource};
use crate::core::request::RequestId;
use crate::core::request_queue::RequestQueue;
use crate::util::clock::{hour_of_day, ms_to_secs};

/// Latest power state as seen by the control loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerView {
    /// Most recent snapshot, fresh or cached.
    pub snapshot: Option<PowerSnapshot>,
    /// False once no reading is available within the staleness bound.
    pub known: bool,
    /// Admission gate state after the last evaluation.
    pub armed: bool,
    /// Tick time the view was produced at.
    pub updated_at_ms: u64,
}

/// Process-wide state shared by the control loop and status queries.
pub struct SchedulerContext {
    queue: Arc<RequestQueue>,
    calibrator: Mutex<Calibrator>,
    power: RwLock<PowerView>,
    estimates: RwLock<HashMap<RequestId, CompletionEstimate>>,
    audit: Mutex<Box<dyn AuditSink>>,
    monitor_type: MonitorType,
    idle_baseline_watts: f64,
}

impl SchedulerContext {
    /// Assemble a context.
    pub fn new(
        queue: Arc<RequestQueue>,
        calibrator: Calibrator,
        audit: Box<dyn AuditSink>,
        monitor_type: MonitorType,
    ) -> Self {
        Self {
            queue,
            calibrator: Mutex::new(calibrator),
            power: RwLock::new(PowerView::default()),
            estimates: RwLock::new(HashMap::new()),
            audit: Mutex::new(audit),
            monitor_type,
            idle_baseline_watts: SchedulerConfig::default().idle_baseline_watts,
        }
    }

    /// Set the draw treated as idle when attributing power to processing.
    #[must_use]
    pub fn with_idle_baseline_watts(mut self, watts: f64) -> Self {
        self.idle_baseline_watts = watts;
        self
    }

    /// Draw treated as idle.
    pub const fn idle_baseline_watts(&self) -> f64 {
        self.idle_baseline_watts
    }

    /// The request queue.
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Current calibrator averages.
    pub fn estimates(&self) -> Estimates {
        self.calibrator.lock().current_estimates()
    }

    /// Persisted calibrator state.
    pub fn calibration_state(&self) -> CalibrationState {
        self.calibrator.lock().state()
    }

    /// Recent calibration samples, oldest first.
    pub fn calibration_history(&self) -> Vec<CalibrationSample> {
        self.calibrator.lock().history()
    }

    /// Availability duty cycle at `now_ms`.
    pub fn availability_fraction(&self, now_ms: u64) -> f64 {
        self.calibrator.lock().availability_fraction(now_ms)
    }

    /// Learned solar input for `hours_ahead` hours starting at the hour of `now_ms`.
    pub fn solar_forecast(&self, now_ms: u64, hours_ahead: usize) -> Vec<HourlySolar> {
        self.calibrator
            .lock()
            .solar_profile()
            .forecast(hour_of_day(now_ms), hours_ahead)
    }

    /// Latest power view.
    pub fn power_view(&self) -> PowerView {
        self.power.read().clone()
    }

    /// Variant of the active power source.
    pub const fn monitor_type(&self) -> MonitorType {
        self.monitor_type
    }

    /// Completion estimate for a queued request.
    ///
    /// Uses the value from the last tick, or computes one on the spot for a
    /// request submitted since then.
    pub fn estimate_for(&self, id: RequestId, now_ms: u64) -> Option<CompletionEstimate> {
        if let Some(estimate) = self.estimates.read().get(&id) {
            return Some(*estimate);
        }
        let position = self.queue.position_of(id)?;
        let calibrator = self.calibrator.lock();
        Some(CompletionEstimate::compute(
            position,
            calibrator.current_estimates().avg_duration_secs,
            calibrator.availability_fraction(now_ms),
            now_ms,
        ))
    }

    /// Record a lifecycle event.
    pub fn audit(
        &self,
        request_id: Option<RequestId>,
        action: AuditAction,
        at_ms: u64,
        detail: Option<String>,
    ) {
        self.audit
            .lock()
            .record(build_audit_event(request_id, action, at_ms, detail));
    }

    /// Flush the request store and persist calibration state.
    pub fn flush(&self) -> Result<(), SchedulerError> {
        self.queue.flush()?;
        self.calibrator.lock().persist()
    }

    fn set_power(&self, view: PowerView) {
        *self.power.write() = view;
    }

    fn refresh_estimates(&self, now_ms: u64) {
        let (avg, availability) = {
            let calibrator = self.calibrator.lock();
            (
                calibrator.current_estimates().avg_duration_secs,
                calibrator.availability_fraction(now_ms),
            )
        };
        let estimates = self
            .queue
            .queued()
            .into_iter()
            .enumerate()
            .map(|(position, request)| {
                (
                    request.id,
                    CompletionEstimate::compute(position, avg, availability, now_ms),
                )
            })
            .collect();
        *self.estimates.write() = estimates;
    }
}

/// What a tick did about requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request_id", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing to do, or the gate is disarmed.
    Idle,
    /// Power was unknown with work waiting.
    PowerUnknown,
    /// The gateway refused a submit.
    Refused,
    /// The head of the queue was handed to the gateway.
    Dispatched(RequestId),
    /// The in-flight request is still running.
    Pending(RequestId),
    /// The in-flight request finished with a result.
    Completed(RequestId),
    /// A request finished with an error.
    Failed(RequestId),
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick time.
    pub now_ms: u64,
    /// Whether a usable power reading existed.
    pub power_known: bool,
    /// Whether the reading used was a cached one.
    pub stale: bool,
    /// Gate state, if power was known.
    pub armed: Option<bool>,
    /// Request-level outcome.
    pub outcome: TickOutcome,
}

struct InFlight {
    id: RequestId,
    handle: TaskHandle,
    started_at_ms: u64,
    predicted_duration_secs: Option<f64>,
    readings: Vec<(u64, f64)>,
}

/// The control loop. Owns the gate and the in-flight handle; everything
/// else is reached through the shared context.
pub struct Scheduler {
    config: SchedulerConfig,
    context: Arc<SchedulerContext>,
    power: Arc<dyn PowerSource>,
    gateway: Arc<dyn ProcessorGateway>,
    gate: AdmissionGate,
    in_flight: Option<InFlight>,
    last_good: Option<(PowerSnapshot, u64)>,
    refusal_reported: bool,
}

impl Scheduler {
    /// Create a scheduler over the given capabilities.
    pub fn new(
        config: SchedulerConfig,
        context: Arc<SchedulerContext>,
        power: Arc<dyn PowerSource>,
        gateway: Arc<dyn ProcessorGateway>,
    ) -> Self {
        info!(
            monitor = %power.monitor_type(),
            gateway = gateway.kind(),
            dispatch_pct = config.dispatch_threshold_pct,
            resume_pct = config.resume_threshold_pct,
            "scheduler created"
        );
        Self {
            gate: AdmissionGate::new(config.dispatch_threshold_pct, config.resume_threshold_pct),
            config,
            context,
            power,
            gateway,
            in_flight: None,
            last_good: None,
            refusal_reported: false,
        }
    }

    /// Shared context for status queries.
    pub fn context(&self) -> Arc<SchedulerContext> {
        Arc::clone(&self.context)
    }

    /// Loop settings.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Admission gate state.
    pub const fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Request currently executing on the gateway.
    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|flight| flight.id)
    }

    /// Run one control-loop iteration at time `now_ms`.
    ///
    /// Only storage failures are returned; everything else is handled inside
    /// the tick.
    pub async fn tick(&mut self, now_ms: u64) -> Result<TickReport, SchedulerError> {
        let snapshot = self.sample_power(now_ms).await;
        let armed = snapshot
            .as_ref()
            .map(|snap| self.gate.evaluate(snap.battery_level_pct));
        {
            let mut calibrator = self.context.calibrator.lock();
            calibrator.observe_availability(now_ms, armed.unwrap_or(false));
            if let Some(snap) = snapshot.as_ref().filter(|s| !s.stale) {
                if let Err(e) = calibrator.observe_solar(now_ms, snap.solar_output_watts) {
                    warn!(error = %e, "failed to persist solar profile");
                }
            }
        }
        self.context.set_power(PowerView {
            snapshot: snapshot
                .clone()
                .or_else(|| self.last_good.as_ref().map(|(snap, _)| snap.as_stale())),
            known: snapshot.is_some(),
            armed: armed.unwrap_or(false),
            updated_at_ms: now_ms,
        });

        let outcome = if self.in_flight.is_some() {
            self.poll_in_flight(now_ms, snapshot.as_ref()).await?
        } else if let Some(orphan) = self.context.queue.processing() {
            // Processing in the store but no handle here: the result is unreachable.
            warn!(request_id = %orphan.id, "processing request has no execution handle");
            self.context.queue.fail(orphan.id, "lost execution handle", now_ms)?;
            self.context
                .audit(Some(orphan.id), AuditAction::Fail, now_ms, Some("lost execution handle".into()));
            TickOutcome::Failed(orphan.id)
        } else {
            match armed {
                Some(true) => self.dispatch(now_ms, snapshot.as_ref()).await?,
                Some(false) => TickOutcome::Idle,
                None => self.refuse_unknown_power(now_ms),
            }
        };
        if armed.is_some() {
            self.refusal_reported = false;
        }

        self.context.refresh_estimates(now_ms);
        Ok(TickReport {
            now_ms,
            power_known: snapshot.is_some(),
            stale: snapshot.as_ref().is_some_and(|snap| snap.stale),
            armed,
            outcome,
        })
    }

    /// Sample power under the timeout, falling back to the last good reading
    /// while it is within the staleness bound.
    async fn sample_power(&mut self, now_ms: u64) -> Option<PowerSnapshot> {
        let error = match timeout(self.config.sample_timeout(), self.power.sample(now_ms)).await {
            Ok(Ok(snapshot)) => {
                debug!(battery_pct = snapshot.battery_level_pct, "power sampled");
                self.last_good = Some((snapshot.clone(), now_ms));
                return Some(snapshot);
            }
            Ok(Err(e)) => e,
            Err(_) => SchedulerError::Timeout("power sample", self.config.sample_timeout()),
        };

        match &self.last_good {
            Some((snapshot, at_ms)) if now_ms.saturating_sub(*at_ms) <= self.config.max_staleness_ms => {
                warn!(error = %error, age_ms = now_ms.saturating_sub(*at_ms), stale = true, "using cached power reading");
                Some(snapshot.as_stale())
            }
            _ => {
                warn!(error = %error, "power unknown, dispatch refused");
                None
            }
        }
    }

    fn refuse_unknown_power(&mut self, now_ms: u64) -> TickOutcome {
        if self.context.queue.queue_length() == 0 {
            return TickOutcome::Idle;
        }
        if !self.refusal_reported {
            self.refusal_reported = true;
            self.context.audit(
                None,
                AuditAction::DispatchRefused,
                now_ms,
                Some("power unknown".into()),
            );
        }
        TickOutcome::PowerUnknown
    }

    async fn dispatch(
        &mut self,
        now_ms: u64,
        snapshot: Option<&PowerSnapshot>,
    ) -> Result<TickOutcome, SchedulerError> {
        let Some(head) = self.context.queue.peek_head() else {
            return Ok(TickOutcome::Idle);
        };

        let submitted = match timeout(self.config.poll_timeout(), self.gateway.submit(&head.prompt)).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout("gateway submit", self.config.poll_timeout())),
        };
        let handle = match submitted {
            Ok(handle) => handle,
            Err(SchedulerError::GatewayBusy) => {
                warn!(request_id = %head.id, "gateway busy, skipping dispatch this tick");
                self.context.audit(
                    Some(head.id),
                    AuditAction::DispatchRefused,
                    now_ms,
                    Some("gateway busy".into()),
                );
                return Ok(TickOutcome::Refused);
            }
            Err(e) => {
                warn!(request_id = %head.id, error = %e, "submit failed");
                self.context.queue.begin_processing(head.id, now_ms)?;
                self.context.queue.fail(head.id, e.to_string(), now_ms)?;
                self.context
                    .audit(Some(head.id), AuditAction::Fail, now_ms, Some(e.to_string()));
                return Ok(TickOutcome::Failed(head.id));
            }
        };

        self.context.queue.begin_processing(head.id, now_ms)?;
        self.power.set_processing(true);
        let predicted_duration_secs = self.context.estimates().avg_duration_secs;
        info!(
            request_id = %head.id,
            %handle,
            battery_pct = snapshot.map(|s| s.battery_level_pct),
            "request dispatched"
        );
        self.context.audit(
            Some(head.id),
            AuditAction::Dispatch,
            now_ms,
            Some(handle.to_string()),
        );
        self.in_flight = Some(InFlight {
            id: head.id,
            handle,
            started_at_ms: now_ms,
            predicted_duration_secs,
            readings: snapshot
                .filter(|s| !s.stale)
                .map(|s| vec![(now_ms, s.power_watts)])
                .unwrap_or_default(),
        });
        Ok(TickOutcome::Dispatched(head.id))
    }

    async fn poll_in_flight(
        &mut self,
        now_ms: u64,
        snapshot: Option<&PowerSnapshot>,
    ) -> Result<TickOutcome, SchedulerError> {
        let Some(flight) = self.in_flight.as_mut() else {
            return Ok(TickOutcome::Idle);
        };
        if let Some(snap) = snapshot.filter(|s| !s.stale) {
            flight.readings.push((now_ms, snap.power_watts));
        }
        let (id, handle) = (flight.id, flight.handle);

        let status = match timeout(self.config.poll_timeout(), self.gateway.poll(handle)).await {
            Err(_) => {
                warn!(request_id = %id, %handle, "gateway poll timed out");
                PollStatus::Pending
            }
            Ok(Ok(status)) => status,
            Ok(Err(e)) => PollStatus::Failed(format!("gateway poll failed: {e}")),
        };

        match status {
            PollStatus::Pending => Ok(TickOutcome::Pending(id)),
            PollStatus::Ready(output) => {
                let Some(flight) = self.in_flight.take() else {
                    return Ok(TickOutcome::Idle);
                };
                self.power.set_processing(false);
                self.context.queue.complete(id, output, now_ms)?;
                self.record_calibration(&flight, now_ms);
                info!(request_id = %id, "request completed");
                self.context.audit(Some(id), AuditAction::Complete, now_ms, None);
                Ok(TickOutcome::Completed(id))
            }
            PollStatus::Failed(error) => {
                self.in_flight = None;
                self.power.set_processing(false);
                warn!(request_id = %id, error = %error, "request failed");
                self.context.queue.fail(id, error.clone(), now_ms)?;
                self.context.audit(Some(id), AuditAction::Fail, now_ms, Some(error));
                Ok(TickOutcome::Failed(id))
            }
        }
    }

    fn record_calibration(&self, flight: &InFlight, now_ms: u64) {
        let sample = CalibrationSample {
            request_id: flight.id,
            predicted_duration_secs: flight.predicted_duration_secs,
            actual_duration_secs: ms_to_secs(now_ms.saturating_sub(flight.started_at_ms)),
            actual_energy_wh: integrate_energy_wh(&flight.readings, self.config.idle_baseline_watts),
        };
        if let Err(e) = self.context.calibrator.lock().record(sample) {
            warn!(request_id = %flight.id, error = %e, "failed to persist calibration");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::request::RequestStatus;
    use crate::infra::calibration::InMemoryCalibrationStore;
    use crate::infra::gateway::SimulatedGateway;
    use crate::infra::power::SimulatedPowerSource;
    use crate::infra::queue::InMemoryRequestStore;

    struct Harness {
        scheduler: Scheduler,
        power: Arc<SimulatedPowerSource>,
        audit: InMemoryAuditSink,
    }

    fn harness(battery_pct: f64) -> Harness {
        let queue = Arc::new(RequestQueue::open(Box::new(InMemoryRequestStore::new())).unwrap());
        let calibrator =
            Calibrator::open(0.5, 10, 60_000, Box::new(InMemoryCalibrationStore::new())).unwrap();
        let audit = InMemoryAuditSink::new(64);
        let context = Arc::new(SchedulerContext::new(
            queue,
            calibrator,
            Box::new(audit.clone()),
            MonitorType::Simulated,
        ));
        let power = Arc::new(SimulatedPowerSource::with_battery(battery_pct));
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            context,
            Arc::clone(&power) as Arc<dyn PowerSource>,
            Arc::new(SimulatedGateway::echo(Duration::ZERO)),
        );
        Harness {
            scheduler,
            power,
            audit,
        }
    }

    #[tokio::test]
    async fn test_dispatch_then_complete() {
        let mut h = harness(90.0);
        let ctx = h.scheduler.context();
        let id = ctx.queue().enqueue("hello", 0).unwrap();

        let report = h.scheduler.tick(1_000).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Dispatched(id));
        assert_eq!(ctx.queue().get(id).unwrap().status, RequestStatus::Processing);

        let report = h.scheduler.tick(4_000).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Completed(id));
        let request = ctx.queue().get(id).unwrap();
        assert_eq!(request.result.as_deref(), Some("echo: hello"));
        assert_eq!(ctx.estimates().avg_duration_secs, Some(3.0));
        assert_eq!(h.audit.events_with(AuditAction::Complete).len(), 1);
    }

    #[tokio::test]
    async fn test_disarmed_gate_keeps_queue() {
        let mut h = harness(50.0);
        let ctx = h.scheduler.context();
        ctx.queue().enqueue("wait", 0).unwrap();
        let report = h.scheduler.tick(1_000).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Idle);
        assert_eq!(report.armed, Some(false));
        assert_eq!(ctx.queue().queue_length(), 1);

        h.power.charge(40.0);
        let report = h.scheduler.tick(2_000).await.unwrap();
        assert!(matches!(report.outcome, TickOutcome::Dispatched(_)));
    }

    #[tokio::test]
    async fn test_single_in_flight() {
        let mut h = harness(100.0);
        let ctx = h.scheduler.context();
        ctx.queue().enqueue("a", 0).unwrap();
        ctx.queue().enqueue("b", 0).unwrap();
        h.scheduler.tick(1).await.unwrap();
        assert!(ctx.queue().processing().is_some());
        assert_eq!(ctx.queue().queue_length(), 1);
        h.scheduler.tick(2).await.unwrap();
        assert!(ctx.queue().processing().is_none());
        assert_eq!(ctx.queue().queue_length(), 1);
    }

    #[tokio::test]
    async fn test_power_source_told_about_processing() {
        let mut h = harness(100.0);
        let ctx = h.scheduler.context();
        ctx.queue().enqueue("load", 0).unwrap();
        h.scheduler.tick(1_000).await.unwrap();
        assert!(h.power.is_processing());
        h.scheduler.tick(2_000).await.unwrap();
        assert!(!h.power.is_processing());
    }

    #[tokio::test]
    async fn test_fresh_readings_feed_solar_profile() {
        let mut h = harness(50.0);
        let ctx = h.scheduler.context();
        h.scheduler.tick(10 * 3_600_000).await.unwrap();
        assert_eq!(ctx.calibration_state().solar_profile.expected(10), Some(15.0));
        assert_eq!(ctx.calibration_state().solar_profile.expected(11), None);
    }

    #[tokio::test]
    async fn test_estimates_refreshed_for_queue() {
        let mut h = harness(0.0);
        let ctx = h.scheduler.context();
        let id = ctx.queue().enqueue("x", 0).unwrap();
        h.scheduler.tick(10).await.unwrap();
        assert_eq!(ctx.estimate_for(id, 10), Some(CompletionEstimate::Unknown));
    }
}
