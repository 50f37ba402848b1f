//! Assemble a scheduler from [`AppConfig`].
//!
//! Variants are selected here, once, at process start; the scheduler itself
//! only ever sees the capability traits. Building runs startup
//! reconciliation before the loop can tick.

use std::sync::Arc;

use crate::config::{AppConfig, GatewayConfig, PowerSourceConfig, StorageConfig};
use crate::core::{
    AuditAction, AuditSink, CalibrationStore, Calibrator, PowerSource, ProcessorGateway,
    RequestId, RequestQueue, RequestStore, Scheduler, SchedulerContext, SchedulerError,
    TracingAuditSink,
};
use crate::infra::calibration::{InMemoryCalibrationStore, JsonCalibrationStore};
use crate::infra::gateway::{CommandExecutor, SimulatedGateway, WorkerGateway};
use crate::infra::power::{MeterPowerSource, MeterReader, SimulatedPowerSource};
use crate::infra::queue::{InMemoryRequestStore, JsonlRequestStore};
use crate::util::clock::now_ms;

/// Stream name of the request journal under the storage directory.
const REQUEST_STREAM: &str = "requests";

/// Everything produced by a build.
pub struct SchedulerBundle {
    /// The control loop, ready to tick.
    pub scheduler: Scheduler,
    /// Shared state for status queries.
    pub context: Arc<SchedulerContext>,
    /// Handle for charge/discharge hooks when the simulated source is active.
    pub simulated_power: Option<Arc<SimulatedPowerSource>>,
    /// Requests returned to the queue by startup reconciliation.
    pub requeued: Vec<RequestId>,
}

/// Build a scheduler with the power source and gateway named in `cfg`.
///
/// A meter-backed power source needs `meter_reader`.
pub fn build_scheduler(
    cfg: &AppConfig,
    meter_reader: Option<Box<dyn MeterReader>>,
) -> Result<SchedulerBundle, SchedulerError> {
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let (power, simulated_power): (Arc<dyn PowerSource>, _) = match &cfg.power {
        PowerSourceConfig::Simulated(sim) => {
            let source = Arc::new(SimulatedPowerSource::new(sim.clone()));
            (Arc::clone(&source) as Arc<dyn PowerSource>, Some(source))
        }
        PowerSourceConfig::Meter(meter) => {
            let reader = meter_reader.ok_or_else(|| {
                SchedulerError::InvalidConfig("meter power source needs a meter reader".into())
            })?;
            (
                Arc::new(MeterPowerSource::new(reader, meter.clone())) as Arc<dyn PowerSource>,
                None,
            )
        }
    };

    let gateway: Arc<dyn ProcessorGateway> = match &cfg.gateway {
        GatewayConfig::Simulated(sim) => Arc::new(SimulatedGateway::new(sim.clone())),
        GatewayConfig::Command(command) => {
            Arc::new(WorkerGateway::new(CommandExecutor::new(command.clone()))?)
        }
    };

    let mut bundle = build_scheduler_with(cfg, power, gateway, Box::new(TracingAuditSink))?;
    bundle.simulated_power = simulated_power;
    Ok(bundle)
}

/// Build a scheduler around caller-supplied capabilities.
///
/// Storage and calibration still come from `cfg`.
pub fn build_scheduler_with(
    cfg: &AppConfig,
    power: Arc<dyn PowerSource>,
    gateway: Arc<dyn ProcessorGateway>,
    audit: Box<dyn AuditSink>,
) -> Result<SchedulerBundle, SchedulerError> {
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let (request_store, calibration_store) = open_stores(&cfg.storage)?;
    let queue = Arc::new(RequestQueue::open(request_store)?);

    let calibrator = Calibrator::open(
        cfg.calibration.alpha,
        cfg.calibration.history_len,
        cfg.scheduler.availability_window_ms,
        calibration_store,
    )?
    .with_seed(cfg.calibration.seed_duration_secs, cfg.calibration.seed_energy_wh);

    let context = Arc::new(
        SchedulerContext::new(Arc::clone(&queue), calibrator, audit, power.monitor_type())
            .with_idle_baseline_watts(cfg.scheduler.idle_baseline_watts),
    );

    let requeued = queue.reconcile_on_startup()?;
    let now = now_ms();
    for id in &requeued {
        context.audit(Some(*id), AuditAction::Requeue, now, None);
    }

    let scheduler = Scheduler::new(cfg.scheduler.clone(), Arc::clone(&context), power, gateway);
    Ok(SchedulerBundle {
        scheduler,
        context,
        simulated_power: None,
        requeued,
    })
}

fn open_stores(
    storage: &StorageConfig,
) -> Result<(Box<dyn RequestStore>, Box<dyn CalibrationStore>), SchedulerError> {
    match storage {
        StorageConfig::InMemory => Ok((
            Box::new(InMemoryRequestStore::new()),
            Box::new(InMemoryCalibrationStore::new()),
        )),
        StorageConfig::File { dir } => Ok((
            Box::new(JsonlRequestStore::new(dir, REQUEST_STREAM)?),
            Box::new(JsonCalibrationStore::new(dir)?),
        )),
    }
}
