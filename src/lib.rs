//! # Solar LLM Scheduler
//!
//! A power-aware admission and scheduling engine for running LLM inference
//! on solar-powered hardware.
//!
//! Requests are accepted into a durable FIFO queue and executed one at a
//! time, only while the battery allows it. A periodic control loop samples
//! the power source, applies a two-threshold admission gate so dispatch does
//! not flap near a single boundary, hands the head of the queue to a
//! processor gateway, and learns how long and how much energy requests take
//! so it can tell callers when their request is likely to finish.
//!
//! ## Key Features
//!
//! - **Single in-flight execution**: at most one request is ever processing
//! - **Hysteresis**: dispatch arms at a high battery threshold and disarms
//!   only below a lower one
//! - **Fail-safe power handling**: a stale reading is reused for a bounded
//!   time, after which dispatch is refused
//! - **Durable queue**: requests survive restarts; orphaned work is requeued
//!   at the head on startup
//! - **Calibrated estimates**: EWMA of duration and energy plus a trailing
//!   availability duty cycle
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use solar_llm_scheduler::builders::build_scheduler;
//! use solar_llm_scheduler::config::AppConfig;
//! use solar_llm_scheduler::runtime::{api, SchedulerHandle};
//! use solar_llm_scheduler::util::clock::now_ms;
//!
//! let cfg = AppConfig::from_env()?;
//! let bundle = build_scheduler(&cfg, None)?;
//! let ctx = bundle.context.clone();
//! let handle = SchedulerHandle::spawn(bundle.scheduler);
//!
//! let submitted = api::submit(&ctx, "What is solar power?", now_ms())?;
//! let status = api::request_status(&ctx, submitted.id, now_ms())?;
//!
//! handle.shutdown().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Request lifecycle, power and gateway contracts, calibration, and the control loop.
pub mod core;
/// Configuration models for the scheduler and its backends.
pub mod config;
/// Builders to construct the scheduler from configuration.
pub mod builders;
/// Storage backends, power sources, and processor gateways.
pub mod infra;
/// Status/submit API surface and the tick driver.
pub mod runtime;
/// Shared utilities.
pub mod util;
