//! Runtime surface: the tick driver, the status API, and the builder.

use std::io;
use std::time::Duration;

use solar_llm_scheduler::builders::build_scheduler;
use solar_llm_scheduler::config::{
    AppConfig, CalibrationConfig, CommandGatewayConfig, GatewayConfig, MeterPowerConfig, PowerSourceConfig,
    SchedulerConfig, SimulatedGatewayConfig, SimulatedPowerConfig, StorageConfig,
};
use solar_llm_scheduler::core::{MonitorType, RequestStatus, SchedulerError};
use solar_llm_scheduler::infra::{MeterReader, MeterReading};
use solar_llm_scheduler::runtime::{api, SchedulerHandle};
use solar_llm_scheduler::util::clock::now_ms;
use tempfile::TempDir;

struct BenchMeter;

impl MeterReader for BenchMeter {
    fn read(&mut self) -> io::Result<MeterReading> {
        Ok(MeterReading {
            voltage: 4.2,
            current: 1.2,
            power_watts: 14.0,
            temperature: 31.0,
            load_watts: Some(6.0),
        })
    }
}

fn fast_config(battery_pct: f64) -> AppConfig {
    AppConfig {
        scheduler: SchedulerConfig {
            tick_interval_ms: 10,
            ..SchedulerConfig::default()
        },
        power: PowerSourceConfig::Simulated(SimulatedPowerConfig {
            initial_battery_pct: battery_pct,
            ..SimulatedPowerConfig::default()
        }),
        gateway: GatewayConfig::Simulated(SimulatedGatewayConfig {
            delay_ms: 0,
            ..SimulatedGatewayConfig::default()
        }),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_driver_runs_until_shutdown() {
    let bundle = build_scheduler(&fast_config(95.0), None).unwrap();
    let ctx = bundle.context.clone();
    let handle = SchedulerHandle::spawn(bundle.scheduler);

    let id = api::submit(&ctx, "background", now_ms()).unwrap().id;
    let mut status = RequestStatus::Queued;
    for _ in 0..200 {
        status = ctx.queue().get(id).unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RequestStatus::Completed);
    assert!(!handle.is_finished());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_file_storage() {
    let dir = TempDir::new().unwrap();
    let cfg = AppConfig {
        storage: StorageConfig::File {
            dir: dir.path().to_path_buf(),
        },
        ..fast_config(0.0)
    };
    let bundle = build_scheduler(&cfg, None).unwrap();
    let ctx = bundle.context.clone();
    let handle = SchedulerHandle::spawn(bundle.scheduler);
    let id = api::submit(&ctx, "kept", now_ms()).unwrap().id;
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.shutdown().await.unwrap();
    drop(ctx);

    let reopened = build_scheduler(&cfg, None).unwrap();
    assert_eq!(reopened.context.queue().position_of(id), Some(0));
    assert!(dir.path().join("calibration.json").exists());
}

#[tokio::test]
async fn test_status_views() {
    let mut bundle = build_scheduler(&fast_config(90.0), None).unwrap();
    let ctx = bundle.context.clone();

    let before = api::system_status(&ctx, 0);
    assert_eq!(before.battery_level_pct, None);
    assert!(!before.power_known);

    let first = api::submit(&ctx, "one", 0).unwrap();
    let second = api::submit(&ctx, "two", 0).unwrap();
    assert_eq!(first.status, RequestStatus::Queued);
    assert_eq!(second.queue_position, Some(1));

    bundle.scheduler.tick(1_000).await.unwrap();
    let status = api::system_status(&ctx, 1_000);
    assert_eq!(status.battery_level_pct, Some(90.0));
    assert_eq!(status.solar_output_watts, Some(15.0));
    assert_eq!(status.queue_length, 1);
    assert!(status.processing_active);
    assert!(status.dispatch_armed);
    assert_eq!(status.timestamp_ms, 1_000);

    let readings = api::power_readings(&ctx);
    assert_eq!(readings.monitor_type, MonitorType::Simulated);
    // The reading was taken before dispatch, so it still shows the idle draw.
    assert!(readings.power_consumption_watts.abs() < 1e-9);
    assert_eq!(readings.solar_forecast.len(), 24);
    assert_eq!(readings.solar_forecast[0].hour, 0);
    assert_eq!(readings.solar_forecast[0].expected_watts, Some(15.0));
    assert_eq!(readings.solar_forecast[1].expected_watts, None);

    let health = api::health(&ctx);
    assert!(health.ok);
    assert!(health.processing_active);

    let json = serde_json::to_value(api::request_status(&ctx, second.id, 1_000).unwrap()).unwrap();
    assert_eq!(json["status"], "queued");
    assert_eq!(json["queue_position"], 0);
    assert_eq!(json["estimated_completion"]["kind"], "unknown");
}

#[tokio::test]
async fn test_submit_rejects_empty_prompt_and_unknown_ids() {
    let bundle = build_scheduler(&fast_config(50.0), None).unwrap();
    assert!(matches!(
        api::submit(&bundle.context, "   ", 0),
        Err(SchedulerError::EmptyPrompt)
    ));
    let missing = solar_llm_scheduler::core::RequestId::new();
    assert!(matches!(
        api::request_status(&bundle.context, missing, 0),
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_charge_hooks_only_for_simulated_source() {
    let bundle = build_scheduler(&fast_config(50.0), None).unwrap();
    let sim = bundle.simulated_power.as_deref();
    assert!((api::charge(sim, 30.0).unwrap() - 80.0).abs() < 1e-9);
    assert!((api::discharge(sim, 100.0).unwrap()).abs() < 1e-9);

    let cfg = AppConfig {
        power: PowerSourceConfig::Meter(MeterPowerConfig::default()),
        ..fast_config(50.0)
    };
    let bundle = build_scheduler(&cfg, Some(Box::new(BenchMeter))).unwrap();
    assert!(bundle.simulated_power.is_none());
    assert!(api::charge(bundle.simulated_power.as_deref(), 10.0).is_err());
}

#[tokio::test]
async fn test_meter_source_through_builder() {
    let cfg = AppConfig {
        power: PowerSourceConfig::Meter(MeterPowerConfig::default()),
        ..fast_config(0.0)
    };
    assert!(matches!(
        build_scheduler(&cfg, None),
        Err(SchedulerError::InvalidConfig(_))
    ));

    let mut bundle = build_scheduler(&cfg, Some(Box::new(BenchMeter))).unwrap();
    bundle.scheduler.tick(1_000).await.unwrap();
    let readings = api::power_readings(&bundle.context);
    assert_eq!(readings.monitor_type, MonitorType::Meter);
    let snapshot = readings.snapshot.unwrap();
    assert!((snapshot.battery_level_pct - 100.0).abs() < 1e-9);
    assert!((snapshot.solar_output_watts - 14.0).abs() < 1e-9);
    assert!((snapshot.power_watts - 6.0).abs() < 1e-9);
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_gateway_round_trip() {
    let cfg = AppConfig {
        gateway: GatewayConfig::Command(CommandGatewayConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "printf '%s -> done <end>' \"$0\"".into()],
        }),
        ..fast_config(100.0)
    };
    let mut bundle = build_scheduler(&cfg, None).unwrap();
    let id = api::submit(&bundle.context, "run", 0).unwrap().id;

    let mut now = 0;
    for _ in 0..200 {
        now += 10;
        bundle.scheduler.tick(now).await.unwrap();
        if ctx_status(&bundle.context, id).is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let request = bundle.context.queue().get(id).unwrap();
    assert_eq!(request.status, RequestStatus::Completed);
    assert_eq!(request.result.as_deref(), Some("-> done"));
}

fn ctx_status(
    ctx: &solar_llm_scheduler::core::SchedulerContext,
    id: solar_llm_scheduler::core::RequestId,
) -> RequestStatus {
    ctx.queue().get(id).map_or(RequestStatus::Queued, |r| r.status)
}

#[test]
fn test_invalid_config_rejected_by_builder() {
    let cfg = AppConfig {
        scheduler: SchedulerConfig {
            dispatch_threshold_pct: 10.0,
            resume_threshold_pct: 50.0,
            ..SchedulerConfig::default()
        },
        ..AppConfig::default()
    };
    assert!(matches!(
        build_scheduler(&cfg, None),
        Err(SchedulerError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_each_calibration_seed_applies_alone() {
    let duration_only = AppConfig {
        calibration: CalibrationConfig {
            seed_duration_secs: Some(60.0),
            ..CalibrationConfig::default()
        },
        ..AppConfig::default()
    };
    let bundle = build_scheduler(&duration_only, None).unwrap();
    assert_eq!(bundle.context.estimates().avg_duration_secs, Some(60.0));
    assert_eq!(bundle.context.estimates().avg_energy_wh, None);

    let energy_only = AppConfig {
        calibration: CalibrationConfig {
            seed_energy_wh: Some(0.4),
            ..CalibrationConfig::default()
        },
        ..AppConfig::default()
    };
    let bundle = build_scheduler(&energy_only, None).unwrap();
    assert_eq!(bundle.context.estimates().avg_duration_secs, None);
    assert_eq!(bundle.context.estimates().avg_energy_wh, Some(0.4));

    let negative = AppConfig {
        calibration: CalibrationConfig {
            seed_energy_wh: Some(-0.4),
            ..CalibrationConfig::default()
        },
        ..AppConfig::default()
    };
    assert!(matches!(
        build_scheduler(&negative, None),
        Err(SchedulerError::InvalidConfig(_))
    ));
}
