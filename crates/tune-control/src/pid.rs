//! Closed-loop PID/step controller.
//!
//! Each frame yields one intensity figure from the frame's histogram, the
//! error against the target drives exactly one relative change of the
//! controlled parameter.
//!
//! # Step size and direction
//!
//! `|output|` of the PID law (or the fixed `control_step`) is the step size.
//! The direction comes from the sign of the error, flipped for inverted
//! controls. The PID sign is never used.
//!
//! # Oscillation guard
//!
//! With `stop_when_done` and a previous step of 1, a reversal of direction
//! compares `|error|` against the error before the last move:
//! - grew: take one step back and finish with [`Termination::BestAchievable`]
//! - did not grow: take a single exploratory step in the new direction
//!
//! Moving on in the same direction with a growing error steps back by 1.

use crate::client::ControlClient;
use crate::outcome::{Flow, FrameController, Termination};
use serde::{Deserialize, Serialize};
use tune_core::{
    ControlChannel, ControlRef, Frame, HistogramStats, TuneError, TuneResult,
};

const NAME: &str = "pid";

// =============================================================================
// Configuration
// =============================================================================

/// Which histogram figure is compared against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Histogram mean.
    Average,
    /// Lowest intensity holding at least 1% of the pixels.
    AbsoluteMinimum,
    /// Highest intensity holding at least 1% of the pixels.
    AbsoluteMaximum,
}

/// PID settings, read from the `[pid]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    /// Control to drive, by name.
    #[serde(default = "default_control_name")]
    pub control_name: String,

    /// Target intensity, 1..=254 (default: 127)
    #[serde(default = "default_target_value")]
    pub target_value: u32,

    /// Histogram figure to regulate (default: average)
    #[serde(default = "default_target_type")]
    pub target_type: TargetType,

    /// Increasing the control lowers the metric.
    #[serde(default)]
    pub inverted: bool,

    /// Allowed |error| at convergence, 0..=10 (default: 0)
    #[serde(default)]
    pub max_error: f64,

    /// Proportional gain (default: 1.0)
    #[serde(default = "default_kp")]
    pub kp: f64,
    /// Integral gain.
    #[serde(default)]
    pub ki: f64,
    /// Derivative gain.
    #[serde(default)]
    pub kd: f64,

    /// Integral clamp, 0 disables it.
    #[serde(default)]
    pub anti_windup_max: f64,

    /// Fixed step replacing the PID output, 0 uses the PID law.
    #[serde(default)]
    pub control_step: u32,

    /// Frame budget, 0 is unlimited.
    #[serde(default)]
    pub max_runs: u32,

    /// Make boundary hits and budget exhaustion fatal and enable the
    /// oscillation guard.
    #[serde(default)]
    pub stop_when_done: bool,
}

fn default_control_name() -> String {
    "exposure time, absolute".to_string()
}
fn default_target_value() -> u32 {
    127
}
fn default_target_type() -> TargetType {
    TargetType::Average
}
fn default_kp() -> f64 {
    1.0
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            control_name: default_control_name(),
            target_value: default_target_value(),
            target_type: default_target_type(),
            inverted: false,
            max_error: 0.0,
            kp: default_kp(),
            ki: 0.0,
            kd: 0.0,
            anti_windup_max: 0.0,
            control_step: 0,
            max_runs: 0,
            stop_when_done: false,
        }
    }
}

impl PidConfig {
    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> TuneResult<()> {
        if !(1..=254).contains(&self.target_value) {
            return Err(TuneError::Configuration(format!(
                "pid.target_value must be within 1..=254, got {}",
                self.target_value
            )));
        }
        if !(0.0..=10.0).contains(&self.max_error) {
            return Err(TuneError::Configuration(format!(
                "pid.max_error must be within 0..=10, got {}",
                self.max_error
            )));
        }
        if self.anti_windup_max < 0.0 {
            return Err(TuneError::Configuration(
                "pid.anti_windup_max must not be negative".to_string(),
            ));
        }
        if self.control_name.trim().is_empty() {
            return Err(TuneError::Configuration(
                "pid.control_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// PID law
// =============================================================================

/// Memory of the PID law between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    /// Sum of past errors, clamped by `anti_windup_max`.
    pub integral: f64,
    /// Error of the last update.
    pub previous_error: f64,
}

impl PidState {
    /// Advance the law by one error sample and return the rounded output.
    ///
    /// Outputs beyond the `i64` range saturate.
    pub fn update(&mut self, config: &PidConfig, error: f64) -> i64 {
        self.integral += error;
        if config.anti_windup_max != 0.0 {
            self.integral = self
                .integral
                .clamp(-config.anti_windup_max, config.anti_windup_max);
        }
        let derivative = error - self.previous_error;
        self.previous_error = error;
        (config.kp * error + config.ki * self.integral + config.kd * derivative).round() as i64
    }
}

/// Extract the controlled figure from a histogram.
///
/// `None` when no bin accumulates 1% of `pixel_count` pixels.
pub fn measure(stats: &HistogramStats, target: TargetType, pixel_count: usize) -> Option<f64> {
    let bin_count = stats.bin_count as usize;
    let required = ((pixel_count as f64 * 0.01) as u64).max(1);
    let scan = |indices: &mut dyn Iterator<Item = usize>| {
        let mut accumulated = 0u64;
        for index in indices {
            accumulated += u64::from(stats.bins.get(index).copied().unwrap_or(0));
            if accumulated >= required {
                return Some(f64::from(stats.bin_value(index as u32)));
            }
        }
        None
    };
    match target {
        TargetType::Average => Some(stats.average),
        TargetType::AbsoluteMinimum => scan(&mut (0..bin_count)),
        TargetType::AbsoluteMaximum => scan(&mut (0..bin_count).rev()),
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    Up,
    Down,
}

/// Result of a relative parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Applied,
    AtBoundary,
}

/// Result of one adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjust {
    Stepped,
    Reached,
    Best { saturated: bool },
    Boundary,
}

/// Drives one control until a histogram figure meets its target.
#[derive(Debug)]
pub struct PidController {
    config: PidConfig,
    target: ControlRef,
    client: ControlClient,
    state: PidState,
    started: bool,
    runs: u32,
    last_error: f64,
    heading: Option<Heading>,
    previous_step: i64,
    value: i64,
    minimum: i64,
    maximum: i64,
    last_sequence: Option<u64>,
}

impl PidController {
    /// Controller that attaches on its first frame.
    pub fn new(config: PidConfig) -> Self {
        let target = ControlRef::by_name(config.control_name.clone());
        Self {
            config,
            target,
            client: ControlClient::new(),
            state: PidState::default(),
            started: false,
            runs: 0,
            last_error: 0.0,
            heading: None,
            previous_step: 0,
            value: 0,
            minimum: 0,
            maximum: 0,
            last_sequence: None,
        }
    }

    /// Active settings.
    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Current parameter value as last reported by the device.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Frames acted on so far.
    pub fn runs(&self) -> u32 {
        self.runs
    }

    /// Current PID memory.
    pub fn state(&self) -> PidState {
        self.state
    }

    fn discover(&mut self, channel: &mut dyn ControlChannel) -> TuneResult<()> {
        let info = self.client.control_info(channel, &self.target)?;
        self.minimum = info.minimum;
        self.maximum = info.maximum;
        self.value = self.client.get_int(channel, &self.target)?;
        tracing::info!(
            control = %self.target,
            value = self.value,
            min = self.minimum,
            max = self.maximum,
            "pid controller attached"
        );
        Ok(())
    }

    /// Move the parameter by `delta`, clamped to its range.
    fn change(&mut self, channel: &mut dyn ControlChannel, delta: i64) -> TuneResult<Move> {
        let at_max = self.value == self.maximum && delta > 0;
        let at_min = self.value == self.minimum && delta < 0;
        if at_max || at_min {
            let limit = if at_max { "maximum" } else { "minimum" };
            let value = self.value;
            if self.config.stop_when_done {
                tracing::error!(control = %self.target, value, "reached {limit} parameter value");
            } else {
                tracing::warn!(control = %self.target, value, "reached {limit} parameter value");
            }
            return Ok(Move::AtBoundary);
        }
        let requested = self.value.saturating_add(delta).clamp(self.minimum, self.maximum);
        self.value = self.client.set_int(channel, &self.target, requested, true)?;
        tracing::debug!(
            control = %self.target,
            requested,
            achieved = self.value,
            "parameter changed"
        );
        Ok(Move::Applied)
    }

    fn step(
        &mut self,
        channel: &mut dyn ControlChannel,
        heading: Heading,
        size: i64,
    ) -> TuneResult<Move> {
        self.heading = Some(heading);
        self.previous_step = size;
        let delta = match (heading, self.config.inverted) {
            (Heading::Up, false) | (Heading::Down, true) => size,
            (Heading::Down, false) | (Heading::Up, true) => -size,
        };
        self.change(channel, delta)
    }

    fn adjust(&mut self, channel: &mut dyn ControlChannel, measured: f64) -> TuneResult<Adjust> {
        let error = f64::from(self.config.target_value) - measured;
        tracing::debug!(error, value = self.value, "pid adjust");

        let output = if self.config.control_step == 0 {
            self.state.update(&self.config, error).saturating_abs()
        } else {
            i64::from(self.config.control_step)
        };

        let heading = if error < -self.config.max_error {
            Heading::Down
        } else if error > self.config.max_error {
            Heading::Up
        } else {
            return Ok(Adjust::Reached);
        };
        let reverse = match heading {
            Heading::Up => Heading::Down,
            Heading::Down => Heading::Up,
        };

        let mut size = output;
        if self.config.stop_when_done && self.previous_step == 1 {
            let grew = error.abs() > self.last_error.abs();
            if self.heading == Some(reverse) {
                if grew {
                    self.last_error = error;
                    let moved = self.step(channel, heading, 1)?;
                    if moved == Move::AtBoundary {
                        return Ok(Adjust::Boundary);
                    }
                    let saturated = self.config.target_type == TargetType::AbsoluteMinimum
                        && measured > 254.0
                        && self.config.target_value == 254;
                    return Ok(Adjust::Best { saturated });
                }
                size = 1;
            } else if grew {
                self.last_error = error;
                return Ok(match self.step(channel, reverse, 1)? {
                    Move::Applied => Adjust::Stepped,
                    Move::AtBoundary => Adjust::Boundary,
                });
            }
        }

        self.last_error = error;
        Ok(match self.step(channel, heading, size)? {
            Move::Applied => Adjust::Stepped,
            Move::AtBoundary => Adjust::Boundary,
        })
    }
}

impl FrameController for PidController {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process_frame(
        &mut self,
        frame: &Frame,
        channel: &mut dyn ControlChannel,
    ) -> TuneResult<Flow> {
        if self.last_sequence == Some(frame.sequence) {
            tracing::debug!(sequence = frame.sequence, "rejecting repeated frame");
            return Ok(Flow::Continue);
        }
        self.last_sequence = Some(frame.sequence);

        if !self.started {
            self.started = true;
            self.discover(channel)?;
        }

        let stats = frame
            .meta
            .histogram
            .as_ref()
            .ok_or_else(|| TuneError::controller(NAME, "histogram metadata not found"))?;

        let Some(measured) = measure(stats, self.config.target_type, frame.pixel_count()) else {
            if self.config.stop_when_done {
                return Err(TuneError::controller(
                    NAME,
                    "no histogram bin had enough pixels in the desired category",
                ));
            }
            tracing::warn!(
                sequence = frame.sequence,
                "no histogram bin had enough pixels in the desired category"
            );
            return Ok(Flow::Continue);
        };

        if self.config.max_runs != 0 && self.runs >= self.config.max_runs {
            if self.config.stop_when_done {
                return Err(TuneError::controller(
                    NAME,
                    format!("reached maximum number of runs = {}", self.config.max_runs),
                ));
            }
            tracing::warn!(runs = self.runs, "reached maximum number of runs");
            return Ok(Flow::Finished(Termination::RunsExhausted { runs: self.runs }));
        }

        let adjust = self.adjust(channel, measured)?;
        self.runs += 1;
        Ok(match adjust {
            Adjust::Stepped => Flow::Continue,
            Adjust::Reached => {
                tracing::info!(
                    control = %self.target,
                    value = self.value,
                    measured,
                    runs = self.runs,
                    "target reached"
                );
                Flow::Finished(Termination::TargetReached { value: self.value })
            }
            Adjust::Best { saturated } => {
                if saturated {
                    tracing::warn!(
                        value = self.value,
                        measured,
                        "reached best value possible at sensor saturation"
                    );
                } else {
                    tracing::info!(value = self.value, measured, "reached best value possible");
                }
                Flow::Finished(Termination::BestAchievable {
                    value: self.value,
                    saturated,
                })
            }
            Adjust::Boundary => {
                if self.config.stop_when_done {
                    return Err(TuneError::controller(
                        NAME,
                        format!("parameter stuck at limit {} while still off target", self.value),
                    ));
                }
                Flow::Finished(Termination::BoundaryReached { value: self.value })
            }
        })
    }
}
