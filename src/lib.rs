//! Closed-loop sensor tuning and fixed-pattern-noise calibration.
//!
//! The workspace crates carry the building blocks:
//! - `tune-core`: control model, control-channel protocol, frames, kernels
//! - `tune-mediator`: the device-control mediator
//! - `tune-driver-mock`: simulated device and sensor
//! - `tune-control`: PID, sweep and calibration controllers
//!
//! This crate adds configuration, tracing setup and the synchronous
//! [`pipeline::Pipeline`] that connects them.

pub mod config;
pub mod pipeline;
pub mod tracing_setup;

pub use config::TuneConfig;
pub use pipeline::{Pipeline, PipelineStats, RunReport};
