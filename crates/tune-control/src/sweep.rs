//! Exhaustive single-parameter sweep.
//!
//! The first frame commits the lower bound. Every later frame scores the
//! value committed on the previous frame, then commits the next one. When the
//! upper bound is reached (or an early-saturation rule fires) the best value
//! is committed once more and the stream ends.
//!
//! Devices with a coarser hardware step than advertised may round a request
//! back to the current value. The sweep then retries with a step one larger,
//! up to `max_step_retries` times.

use crate::client::ControlClient;
use crate::outcome::{Flow, FrameController, Termination};
use serde::{Deserialize, Serialize};
use tune_core::kernels::coldiff;
use tune_core::{ControlChannel, ControlRef, Frame, TuneError, TuneResult};

const NAME: &str = "sweep";

/// Mode bucket share required before a mode policy may stop early.
pub const MIN_MODE_PERCENTAGE: f64 = 95.0;
/// 8-bit intensity at which average policies stop early.
pub const SATURATION_VALUE: f64 = 255.0;

// =============================================================================
// Configuration
// =============================================================================

/// How each swept value is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Walk the domain and only log histogram figures.
    None,
    /// Smallest fixed-pattern column difference wins.
    MinColumnDifference,
    /// Brightest average wins.
    MaxAverage,
    /// Darkest average wins.
    MinAverage,
    /// Highest mode intensity wins.
    MaxMode,
    /// Lowest mode intensity wins.
    MinMode,
}

impl ScorePolicy {
    fn needs_histogram(self) -> bool {
        matches!(
            self,
            ScorePolicy::MaxAverage
                | ScorePolicy::MinAverage
                | ScorePolicy::MaxMode
                | ScorePolicy::MinMode
        )
    }
}

/// Sweep settings, read from the `[sweep]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Control to sweep, by name.
    #[serde(default = "default_control_name")]
    pub control_name: String,

    /// Scoring rule (default: min_column_difference)
    #[serde(default = "default_policy")]
    pub policy: ScorePolicy,

    /// Increment per frame (default: 1)
    #[serde(default = "default_step")]
    pub step: u32,

    /// Lower bound override, clamped into the device range.
    #[serde(default)]
    pub sweep_min: Option<i64>,

    /// Upper bound override, clamped into the device range.
    #[serde(default)]
    pub sweep_max: Option<i64>,

    /// Attempts with a growing step when the device ignores a change
    /// (default: 64)
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: u32,
}

fn default_control_name() -> String {
    "v ramp".to_string()
}
fn default_policy() -> ScorePolicy {
    ScorePolicy::MinColumnDifference
}
fn default_step() -> u32 {
    1
}
fn default_max_step_retries() -> u32 {
    64
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            control_name: default_control_name(),
            policy: default_policy(),
            step: default_step(),
            sweep_min: None,
            sweep_max: None,
            max_step_retries: default_max_step_retries(),
        }
    }
}

impl SweepConfig {
    /// Reject a zero step and inverted bound overrides.
    pub fn validate(&self) -> TuneResult<()> {
        if self.step == 0 {
            return Err(TuneError::Configuration(
                "sweep.step must be at least 1".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.sweep_min, self.sweep_max) {
            if min > max {
                return Err(TuneError::Configuration(format!(
                    "sweep.sweep_min ({min}) is above sweep.sweep_max ({max})"
                )));
            }
        }
        if self.control_name.trim().is_empty() {
            return Err(TuneError::Configuration(
                "sweep.control_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Best candidate so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Swept value.
    pub value: i64,
    /// Score under the active policy.
    pub score: f64,
    /// Share of pixels in the mode bucket, mode policies only.
    pub mode_percentage: f64,
}

enum Advance {
    Moved,
    AtLimit,
}

/// Walks one control across its range and keeps the best-scoring value.
#[derive(Debug)]
pub struct SweepController {
    config: SweepConfig,
    target: ControlRef,
    client: ControlClient,
    started: bool,
    value: i64,
    minimum: i64,
    maximum: i64,
    best: Option<Candidate>,
    last_sequence: Option<u64>,
}

impl SweepController {
    /// Controller that attaches on its first frame.
    pub fn new(config: SweepConfig) -> Self {
        let target = ControlRef::by_name(config.control_name.clone());
        Self {
            config,
            target,
            client: ControlClient::new(),
            started: false,
            value: 0,
            minimum: 0,
            maximum: 0,
            best: None,
            last_sequence: None,
        }
    }

    /// Best candidate seen so far.
    pub fn best(&self) -> Option<Candidate> {
        self.best
    }

    /// Value last committed to the device.
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Effective sweep domain once the first frame has been seen.
    pub fn bounds(&self) -> (i64, i64) {
        (self.minimum, self.maximum)
    }

    fn clamp_override(&self, label: &str, requested: i64) -> i64 {
        if (self.minimum..=self.maximum).contains(&requested) {
            return requested;
        }
        let used = requested.clamp(self.minimum, self.maximum);
        tracing::warn!(
            control = %self.target,
            requested,
            min = self.minimum,
            max = self.maximum,
            used,
            "invalid sweep {label} requested"
        );
        used
    }

    fn begin(&mut self, channel: &mut dyn ControlChannel) -> TuneResult<Flow> {
        let info = self.client.control_info(channel, &self.target)?;
        self.minimum = info.minimum;
        self.maximum = info.maximum;
        self.value = self.client.get_int(channel, &self.target)?;

        if let Some(min) = self.config.sweep_min {
            self.minimum = self.clamp_override("min", min);
        }
        if let Some(max) = self.config.sweep_max {
            self.maximum = self.clamp_override("max", max);
        }
        if self.minimum > self.maximum {
            return Err(TuneError::controller(
                NAME,
                format!(
                    "incompatible sweep min and max ({} > {})",
                    self.minimum, self.maximum
                ),
            ));
        }
        tracing::info!(
            control = %self.target,
            min = self.minimum,
            max = self.maximum,
            step = self.config.step,
            policy = ?self.config.policy,
            "sweep started"
        );
        self.commit(channel, self.minimum)?;
        Ok(Flow::Continue)
    }

    fn commit(&mut self, channel: &mut dyn ControlChannel, value: i64) -> TuneResult<()> {
        let previous = self.value;
        self.value = self.client.set_int(channel, &self.target, value, true)?;
        if self.value != value {
            tracing::debug!(
                previous,
                requested = value,
                achieved = self.value,
                "device adjusted sweep value"
            );
        }
        Ok(())
    }

    fn score(&mut self, frame: &Frame) -> TuneResult<()> {
        let policy = self.config.policy;
        let histogram = frame.meta.histogram.as_ref();
        if policy.needs_histogram() && histogram.is_none() {
            return Err(TuneError::controller(NAME, "histogram metadata not found"));
        }

        let (score, mode_percentage) = match (policy, histogram) {
            (ScorePolicy::None, stats) => {
                if let Some(h) = stats {
                    tracing::debug!(
                        value = self.value,
                        min = h.min_value,
                        avg = h.average,
                        max = h.max_value,
                        median = h.bin_value(h.median_bin),
                        mode = h.mode_value(),
                        "sweep sample"
                    );
                }
                return Ok(());
            }
            (ScorePolicy::MinColumnDifference, _) => {
                let diff = match frame.meta.magic.as_ref() {
                    Some(magic) => coldiff::from_magic(magic)?,
                    None => {
                        tracing::warn!("rolling-median metadata not found, scoring raw pixels");
                        coldiff::from_pixels(frame)?
                    }
                };
                (diff, 0.0)
            }
            (ScorePolicy::MaxAverage | ScorePolicy::MinAverage, Some(h)) => (h.average, 0.0),
            (ScorePolicy::MaxMode | ScorePolicy::MinMode, Some(h)) => (
                f64::from(h.mode_value()),
                h.mode_percentage(frame.pixel_count()),
            ),
            (_, None) => return Err(TuneError::controller(NAME, "histogram metadata not found")),
        };
        tracing::debug!(value = self.value, score, mode_percentage, "sweep sample");

        let better = match (self.best, policy) {
            (None, _) => true,
            (Some(_), _) if self.value == self.minimum => true,
            (Some(best), ScorePolicy::MinColumnDifference | ScorePolicy::MinAverage) => {
                score < best.score
            }
            (Some(best), ScorePolicy::MaxAverage) => score > best.score,
            (Some(best), ScorePolicy::MaxMode) => {
                score > best.score
                    || (score == best.score && mode_percentage > best.mode_percentage)
            }
            (Some(best), ScorePolicy::MinMode) => {
                score < best.score
                    || (score == best.score && mode_percentage > best.mode_percentage)
            }
            (Some(_), ScorePolicy::None) => false,
        };
        if better {
            self.best = Some(Candidate {
                value: self.value,
                score,
                mode_percentage,
            });
        }
        Ok(())
    }

    fn saturated(&self) -> bool {
        let Some(best) = self.best else {
            return false;
        };
        match self.config.policy {
            ScorePolicy::MaxAverage => best.score >= SATURATION_VALUE,
            ScorePolicy::MinAverage => best.score <= 0.0,
            ScorePolicy::MaxMode => {
                best.score >= SATURATION_VALUE && best.mode_percentage > MIN_MODE_PERCENTAGE
            }
            ScorePolicy::MinMode => best.score <= 0.0 && best.mode_percentage > MIN_MODE_PERCENTAGE,
            ScorePolicy::None | ScorePolicy::MinColumnDifference => false,
        }
    }

    /// Move up by the configured step, growing it while the device keeps
    /// the old value.
    fn advance(&mut self, channel: &mut dyn ControlChannel) -> TuneResult<Advance> {
        let mut step = i64::from(self.config.step);
        for _ in 0..=self.config.max_step_retries {
            let old = self.value;
            let requested = (old + step).min(self.maximum);
            self.commit(channel, requested)?;
            if self.value != old {
                return Ok(Advance::Moved);
            }
            if requested == self.maximum && requested > self.value {
                tracing::warn!(
                    control = %self.target,
                    from = old,
                    requested,
                    "cannot change parameter by requested step and already at the limit"
                );
                return Ok(Advance::AtLimit);
            }
            tracing::warn!(
                control = %self.target,
                from = old,
                requested,
                "cannot change parameter by requested step, increasing step"
            );
            step += 1;
        }
        tracing::warn!(
            control = %self.target,
            value = self.value,
            retries = self.config.max_step_retries,
            "step retries exhausted"
        );
        Ok(Advance::AtLimit)
    }

    fn finish(&mut self, channel: &mut dyn ControlChannel, early: bool) -> TuneResult<Flow> {
        if self.config.policy == ScorePolicy::None {
            tracing::info!(control = %self.target, "sweep done");
            return Ok(Flow::Finished(Termination::SweepComplete { best: None, early }));
        }
        let Some(best) = self.best else {
            tracing::warn!(control = %self.target, "sweep done without a scored value");
            return Ok(Flow::Finished(Termination::SweepComplete { best: None, early }));
        };
        tracing::info!(
            control = %self.target,
            best = best.value,
            score = best.score,
            early,
            "sweep done"
        );
        self.commit(channel, best.value)?;
        Ok(Flow::Finished(Termination::SweepComplete {
            best: Some(best.value),
            early,
        }))
    }
}

impl FrameController for SweepController {
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
            return self.begin(channel);
        }

        self.score(frame)?;

        if self.value >= self.maximum {
            return self.finish(channel, false);
        }
        if self.saturated() {
            return self.finish(channel, true);
        }
        match self.advance(channel)? {
            Advance::Moved => Ok(Flow::Continue),
            Advance::AtLimit => self.finish(channel, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(SweepConfig::default().validate().is_ok());
        let zero_step = SweepConfig {
            step: 0,
            ..Default::default()
        };
        assert!(zero_step.validate().is_err());
        let inverted = SweepConfig {
            sweep_min: Some(10),
            sweep_max: Some(5),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
