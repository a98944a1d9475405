//! Frame-driven controllers.
//!
//! Each controller implements [`FrameController`]: it inspects the metadata
//! attached to one frame, decides on at most one parameter change, and sends
//! it through a [`tune_core::ControlChannel`] using a [`ControlClient`].
//!
//! - [`PidController`]: drives a metric (average, absolute minimum or
//!   absolute maximum) towards a target with a PID law or fixed steps.
//! - [`SweepController`]: walks a parameter across its range, scoring each
//!   value, and commits the best one.
//! - [`CalibrationController`]: collects column statistics across an
//!   exposure ramp and solves a fixed-pattern-noise correction table.

pub mod calibration;
pub mod client;
pub mod outcome;
pub mod pid;
pub mod sweep;

pub use calibration::{
    CalibrationConfig, CalibrationController, CalibrationObserver, CalibrationReport,
    CorrectionTarget, ExposureSample,
};
pub use client::ControlClient;
pub use outcome::{Flow, FrameController, Termination};
pub use pid::{PidConfig, PidController, PidState, TargetType};
pub use sweep::{Candidate, ScorePolicy, SweepConfig, SweepController};
