//! Tests for configuration parsing, validation, and environment overrides

use std::path::PathBuf;

use solar_llm_scheduler::config::{
    AppConfig, GatewayConfig, PowerSourceConfig, StorageConfig, CONFIG_PATH_ENV,
};

#[test]
fn test_full_json_config() {
    let raw = r#"{
        "scheduler": {
            "tick_interval_ms": 1000,
            "dispatch_threshold_pct": 75,
            "resume_threshold_pct": 25,
            "max_staleness_ms": 30000
        },
        "calibration": { "alpha": 0.2, "seed_duration_secs": 45.0, "seed_energy_wh": 0.4 },
        "power": { "kind": "meter", "min_cell_voltage": 3.0, "max_cell_voltage": 4.2 },
        "gateway": { "kind": "command", "program": "/usr/bin/llama", "args": ["-n", "256"] },
        "storage": { "kind": "file", "dir": "/var/lib/solar" }
    }"#;
    let cfg = AppConfig::from_json_str(raw).unwrap();

    assert_eq!(cfg.scheduler.tick_interval_ms, 1000);
    assert!((cfg.scheduler.dispatch_threshold_pct - 75.0).abs() < f64::EPSILON);
    // Unspecified fields keep their defaults.
    assert_eq!(cfg.scheduler.sample_timeout_ms, 2000);
    assert!((cfg.calibration.alpha - 0.2).abs() < f64::EPSILON);
    assert_eq!(cfg.calibration.history_len, 100);

    match &cfg.power {
        PowerSourceConfig::Meter(meter) => {
            assert!((meter.min_cell_voltage - 3.0).abs() < f64::EPSILON);
            assert!((meter.base_consumption_watts - 2.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected power config {other:?}"),
    }
    match &cfg.gateway {
        GatewayConfig::Command(cmd) => {
            assert_eq!(cmd.program, PathBuf::from("/usr/bin/llama"));
            assert_eq!(cmd.args, vec!["-n".to_string(), "256".to_string()]);
        }
        other => panic!("unexpected gateway config {other:?}"),
    }
    assert_eq!(
        cfg.storage,
        StorageConfig::File {
            dir: PathBuf::from("/var/lib/solar")
        }
    );
}

#[test]
fn test_empty_json_gives_defaults() {
    let cfg = AppConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg, AppConfig::default());
    assert!(matches!(cfg.power, PowerSourceConfig::Simulated(_)));
    assert!(matches!(cfg.gateway, GatewayConfig::Simulated(_)));
    assert_eq!(cfg.storage, StorageConfig::InMemory);
}

#[test]
fn test_invalid_json_configs() {
    assert!(AppConfig::from_json_str("not json").is_err());
    assert!(AppConfig::from_json_str(r#"{"scheduler": {"tick_interval_ms": 0}}"#).is_err());
    assert!(AppConfig::from_json_str(r#"{"scheduler": {"dispatch_threshold_pct": 150}}"#).is_err());
    assert!(AppConfig::from_json_str(r#"{"calibration": {"alpha": 1.5}}"#).is_err());
    assert!(AppConfig::from_json_str(
        r#"{"power": {"kind": "meter", "min_cell_voltage": 4.2, "max_cell_voltage": 3.3}}"#
    )
    .is_err());
    assert!(AppConfig::from_json_str(r#"{"power": {"kind": "solar_wind"}}"#).is_err());
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = AppConfig::default();
    let raw = serde_json::to_string(&cfg).unwrap();
    assert_eq!(AppConfig::from_json_str(&raw).unwrap(), cfg);
}

#[test]
fn test_from_env_reads_file_and_overrides() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("scheduler.json");
    std::fs::write(&path, r#"{"scheduler": {"tick_interval_ms": 750}}"#).unwrap();

    std::env::set_var(CONFIG_PATH_ENV, &path);
    std::env::set_var("SOLAR_SCHEDULER_DISPATCH_PCT", "85");
    std::env::set_var("SOLAR_SCHEDULER_RESUME_PCT", "30");
    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.scheduler.tick_interval_ms, 750);
    assert!((cfg.scheduler.dispatch_threshold_pct - 85.0).abs() < f64::EPSILON);
    assert!((cfg.scheduler.resume_threshold_pct - 30.0).abs() < f64::EPSILON);

    std::env::set_var("SOLAR_SCHEDULER_RESUME_PCT", "not-a-number");
    assert!(AppConfig::from_env().is_err());

    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var("SOLAR_SCHEDULER_DISPATCH_PCT");
    std::env::remove_var("SOLAR_SCHEDULER_RESUME_PCT");
}
