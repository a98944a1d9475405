//! Fixed-pattern-noise calibration.
//!
//! Steps the exposure through a range and collects, for every exposure whose
//! frame average lands in the usable intensity window, the per-column rolling
//! median and error from the frame's [`MagicErrorStats`]. The response slope
//! of each column's error against its median yields a correction table that
//! is written to the correction control in one set.
//!
//! ```text
//! slope[i][j] = (error[i][j] - error[i-1][j]) / max-guarded(median[i][j] - median[i-1][j])
//! value[j]    = round((1 - mean_i(slope[i][j])) * denominator), clamped to the control range
//! ```
//!
//! The very first frame after stream start is discarded. Every exposure
//! change requests a flush so the next analysed frame reflects it.

use crate::client::ControlClient;
use crate::outcome::{Flow, FrameController, Termination};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tune_core::{
    ArrayValue, ControlChannel, ControlRef, ControlValue, Frame, MagicErrorStats, TuneError,
    TuneResult,
};

const NAME: &str = "calibration";

// =============================================================================
// Configuration
// =============================================================================

/// Calibration settings, read from the `[calibration]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Array control receiving the per-column gains.
    #[serde(default = "default_correction_control")]
    pub correction_control: String,

    /// Control stepped between samples.
    #[serde(default = "default_exposure_control")]
    pub exposure_control: String,

    /// First exposure (default: 1000)
    #[serde(default = "default_exposure_min")]
    pub exposure_min: i64,

    /// Exposure limit, exclusive of the sample count (default: 50001)
    #[serde(default = "default_exposure_max")]
    pub exposure_max: i64,

    /// Exposure increment (default: 1000)
    #[serde(default = "default_exposure_step")]
    pub exposure_step: i64,

    /// Lowest frame average accepted as a sample (default: 9766)
    #[serde(default = "default_min_intensity")]
    pub min_usable_intensity: i32,

    /// Frame average above which sampling stops (default: 51400)
    #[serde(default = "default_max_intensity")]
    pub max_usable_intensity: i32,

    /// End the stream once calibration is done (default: true)
    #[serde(default = "default_true")]
    pub throw_eos: bool,

    /// Also write the table to `file_path/file_name`.
    #[serde(default)]
    pub write_to_file: bool,

    /// Output directory, created if missing (default: "./")
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,

    /// Output file name (default: "calced_fpnc")
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

fn default_correction_control() -> String {
    "Fixed Pattern Noise Correction".to_string()
}
fn default_exposure_control() -> String {
    "Exposure Time, Absolute".to_string()
}
fn default_exposure_min() -> i64 {
    1000
}
fn default_exposure_max() -> i64 {
    50001
}
fn default_exposure_step() -> i64 {
    1000
}
fn default_min_intensity() -> i32 {
    9766
}
fn default_max_intensity() -> i32 {
    51400
}
fn default_true() -> bool {
    true
}
fn default_file_path() -> PathBuf {
    PathBuf::from("./")
}
fn default_file_name() -> String {
    "calced_fpnc".to_string()
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            correction_control: default_correction_control(),
            exposure_control: default_exposure_control(),
            exposure_min: default_exposure_min(),
            exposure_max: default_exposure_max(),
            exposure_step: default_exposure_step(),
            min_usable_intensity: default_min_intensity(),
            max_usable_intensity: default_max_intensity(),
            throw_eos: true,
            write_to_file: false,
            file_path: default_file_path(),
            file_name: default_file_name(),
        }
    }
}

impl CalibrationConfig {
    /// Reject an empty range, a non-positive step and an inverted window.
    pub fn validate(&self) -> TuneResult<()> {
        if self.exposure_step <= 0 {
            return Err(TuneError::Configuration(
                "calibration.exposure_step must be positive".to_string(),
            ));
        }
        if self.exposure_min >= self.exposure_max {
            return Err(TuneError::Configuration(format!(
                "calibration exposure range is empty ({}..{})",
                self.exposure_min, self.exposure_max
            )));
        }
        if self.min_usable_intensity > self.max_usable_intensity {
            return Err(TuneError::Configuration(format!(
                "calibration usable intensity window is inverted ({} > {})",
                self.min_usable_intensity, self.max_usable_intensity
            )));
        }
        if self.write_to_file && self.file_name.trim().is_empty() {
            return Err(TuneError::Configuration(
                "calibration.file_name must not be empty when writing to file".to_string(),
            ));
        }
        Ok(())
    }

    /// Sample capacity for the configured range.
    pub fn max_samples(&self) -> usize {
        usize::try_from((self.exposure_max - self.exposure_min) / self.exposure_step.max(1))
            .unwrap_or(0)
    }
}

// =============================================================================
// Solve
// =============================================================================

/// Column statistics captured at one exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureSample {
    /// Exposure the frame was captured at.
    pub exposure: i64,
    /// Rolling-median baseline per column.
    pub median: Vec<i32>,
    /// Deviation from the baseline per column.
    pub error: Vec<i32>,
}

/// Shape of the correction control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionTarget {
    /// Smallest gain the device accepts.
    pub minimum: i64,
    /// Largest gain the device accepts.
    pub maximum: i64,
    /// Identity value: a column multiplied by `denominator / denominator`.
    pub denominator: i64,
    /// Table length.
    pub element_count: u32,
}

/// Solve the correction table for `width` columns.
///
/// Needs at least two samples; columns beyond `width` get the denominator.
pub fn solve(
    samples: &[ExposureSample],
    width: usize,
    target: &CorrectionTarget,
) -> Option<Vec<i64>> {
    if samples.len() < 2 {
        return None;
    }
    let pairs = (samples.len() - 1) as f64;
    let mut slope_sum = vec![0.0f64; width];
    for pair in samples.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        for (j, sum) in slope_sum.iter_mut().enumerate() {
            let median = |s: &ExposureSample| f64::from(s.median.get(j).copied().unwrap_or(0));
            let error = |s: &ExposureSample| f64::from(s.error.get(j).copied().unwrap_or(0));
            let mut diff = median(next) - median(prev);
            if diff == 0.0 {
                diff = 1.0;
            }
            *sum += (error(next) - error(prev)) / diff;
        }
    }

    let denominator = target.denominator as f64;
    let mut table: Vec<i64> = slope_sum
        .iter()
        .enumerate()
        .map(|(j, sum)| {
            let slope = sum / pairs;
            let raw = ((1.0 - slope) * denominator).round() as i64;
            let clamped = raw.clamp(target.minimum, target.maximum);
            if clamped != raw {
                tracing::debug!(column = j, raw, clamped, "correction clamped");
            }
            clamped
        })
        .collect();
    table.truncate(target.element_count as usize);
    table.resize(target.element_count as usize, target.denominator);
    Some(table)
}

/// Write one value per line to `dir/name`, creating `dir` if needed.
pub fn write_table(dir: &Path, name: &str, values: &[i64]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    let mut file = fs::File::create(&path)?;
    for value in values {
        writeln!(file, "{value}")?;
    }
    file.flush()?;
    Ok(path)
}

// =============================================================================
// Controller
// =============================================================================

/// Outcome handed to the completion observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationReport {
    /// Whether the device accepted the table.
    pub success: bool,
    /// The solved table.
    pub correction: ArrayValue,
    /// Payload size in bytes.
    pub byte_size: usize,
    /// Element count of the correction control.
    pub element_count: u32,
}

/// Completion callback.
pub type CalibrationObserver = Box<dyn FnMut(&CalibrationReport) + Send>;

/// Steps the exposure, samples column statistics and solves a
/// fixed-pattern correction table.
///
/// The identity table is written before sampling starts and the starting
/// exposure is restored at the end, also when the device refuses the table.
pub struct CalibrationController {
    config: CalibrationConfig,
    correction_ref: ControlRef,
    exposure_ref: ControlRef,
    client: ControlClient,
    observer: Option<CalibrationObserver>,
    skip_first: bool,
    started: bool,
    complete: bool,
    target: CorrectionTarget,
    element_size: u32,
    starting_exposure: i64,
    range_min: i64,
    range_max: i64,
    next_exposure: i64,
    samples: Vec<ExposureSample>,
    report: Option<CalibrationReport>,
}

impl CalibrationController {
    /// Controller that attaches on its first frame.
    pub fn new(config: CalibrationConfig) -> Self {
        let correction_ref = ControlRef::by_name(config.correction_control.clone());
        let exposure_ref = ControlRef::by_name(config.exposure_control.clone());
        Self {
            range_min: config.exposure_min,
            range_max: config.exposure_max,
            next_exposure: config.exposure_min,
            config,
            correction_ref,
            exposure_ref,
            client: ControlClient::new(),
            observer: None,
            skip_first: true,
            started: false,
            complete: false,
            target: CorrectionTarget {
                minimum: 0,
                maximum: 0,
                denominator: 1,
                element_count: 0,
            },
            element_size: 4,
            starting_exposure: 0,
            samples: Vec::new(),
            report: None,
        }
    }

    /// Called once with the solved table, whether or not the device took it.
    pub fn with_observer(mut self, observer: CalibrationObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// True once the table was solved or given up on.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Samples collected so far, in exposure order.
    pub fn samples(&self) -> &[ExposureSample] {
        &self.samples
    }

    /// Report of the last solve, if any.
    pub fn report(&self) -> Option<&CalibrationReport> {
        self.report.as_ref()
    }

    /// Exposure in effect when the controller attached.
    pub fn starting_exposure(&self) -> i64 {
        self.starting_exposure
    }

    fn begin(&mut self, channel: &mut dyn ControlChannel) -> TuneResult<()> {
        let info = self.client.control_info(channel, &self.correction_ref)?;
        let extended = info.extended.ok_or_else(|| {
            TuneError::controller(
                NAME,
                format!("control '{}' is not an array control", info.name),
            )
        })?;
        self.target = CorrectionTarget {
            minimum: info.minimum,
            maximum: info.maximum,
            denominator: info.default_value,
            element_count: extended.element_count,
        };
        self.element_size = extended.element_size;
        tracing::debug!(
            min = self.target.minimum,
            max = self.target.maximum,
            denominator = self.target.denominator,
            elements = self.target.element_count,
            "correction control"
        );

        let identity = ArrayValue::new(
            self.element_size,
            vec![self.target.denominator; self.target.element_count as usize],
        );
        self.client
            .set(channel, &self.correction_ref, ControlValue::Array(identity), false)?;

        let exposure = self.client.control_info(channel, &self.exposure_ref)?;
        self.starting_exposure = self.client.get_int(channel, &self.exposure_ref)?;
        self.range_min = self.config.exposure_min.max(exposure.minimum);
        self.range_max = self.config.exposure_max.min(exposure.maximum);
        self.next_exposure = self.range_min;
        tracing::info!(
            start = self.starting_exposure,
            from = self.range_min,
            to = self.range_max,
            step = self.config.exposure_step,
            "calibration started"
        );
        Ok(())
    }

    /// `Ok(false)` when too few samples were collected. A table the device
    /// refuses is reported to the observer and then returned as the error.
    fn solve_and_apply(
        &mut self,
        channel: &mut dyn ControlChannel,
        width: usize,
    ) -> TuneResult<bool> {
        let Some(table) = solve(&self.samples, width, &self.target) else {
            tracing::warn!(
                samples = self.samples.len(),
                "at least 2 usable exposures are required to calculate the correction"
            );
            return Ok(false);
        };

        let correction = ArrayValue::new(self.element_size, table);
        let applied = self.client.set(
            channel,
            &self.correction_ref,
            ControlValue::Array(correction.clone()),
            false,
        );
        match &applied {
            Ok(_) => tracing::info!(elements = correction.len(), "correction table applied"),
            Err(err) => tracing::error!(error = %err, "unable to apply correction table"),
        }

        let report = CalibrationReport {
            success: applied.is_ok(),
            byte_size: correction.byte_size(),
            element_count: self.target.element_count,
            correction,
        };
        if let Some(observer) = self.observer.as_mut() {
            observer(&report);
        }
        if self.config.write_to_file {
            match write_table(
                &self.config.file_path,
                &self.config.file_name,
                &report.correction.elements,
            ) {
                Ok(path) => tracing::info!(path = %path.display(), "correction table written"),
                Err(err) => tracing::warn!(error = %err, "failed to write correction table"),
            }
        }
        self.report = Some(report);
        applied.map(|_| true)
    }

    fn finish(&mut self, channel: &mut dyn ControlChannel, width: usize) -> TuneResult<Flow> {
        let solved = self.solve_and_apply(channel, width);

        // The exposure goes back even when the table was refused.
        tracing::debug!(exposure = self.starting_exposure, "restoring exposure");
        let restored = self
            .client
            .set_int(channel, &self.exposure_ref, self.starting_exposure, false);

        self.complete = true;
        let solved = solved?;
        restored?;
        tracing::info!(solved, samples = self.samples.len(), "calibration completed");
        if self.config.throw_eos {
            Ok(Flow::Finished(Termination::CalibrationComplete { solved }))
        } else {
            Ok(Flow::Continue)
        }
    }

    fn store(&mut self, magic: &MagicErrorStats) {
        let exposure = self.next_exposure - self.config.exposure_step;
        tracing::debug!(average = magic.average, exposure, "usable exposure");
        self.samples.push(ExposureSample {
            exposure,
            median: magic.rolling_median.clone(),
            error: magic.error.clone(),
        });
    }
}

impl FrameController for CalibrationController {
    fn name(&self) -> &'static str {
        NAME
    }

    fn process_frame(
        &mut self,
        frame: &Frame,
        channel: &mut dyn ControlChannel,
    ) -> TuneResult<Flow> {
        if self.skip_first {
            self.skip_first = false;
            return Ok(Flow::Continue);
        }
        if self.complete {
            return Ok(Flow::Continue);
        }

        let magic = frame.meta.magic.as_ref().ok_or_else(|| {
            TuneError::controller(NAME, "rolling-median metadata not found")
        })?;
        if magic.column_count != frame.width {
            return Err(TuneError::controller(
                NAME,
                format!(
                    "metadata length is not equal to frame width: {} != {}",
                    magic.column_count, frame.width
                ),
            ));
        }
        let width = frame.width as usize;

        if !self.started {
            self.started = true;
            self.begin(channel)?;
        } else {
            let average = magic.average;
            let range_done = self.next_exposure >= self.range_max;
            if average < self.config.min_usable_intensity && !range_done {
                tracing::debug!(average, "frame too dark, ignoring");
            } else if average > self.config.max_usable_intensity
                || range_done
                || self.samples.len() >= self.config.max_samples()
            {
                return self.finish(channel, width);
            } else {
                self.store(magic);
            }
        }

        tracing::debug!(exposure = self.next_exposure, "next exposure");
        let exposure = self.next_exposure;
        self.next_exposure += self.config.exposure_step;
        self.client
            .set_int(channel, &self.exposure_ref, exposure, true)?;
        Ok(Flow::Continue)
    }
}

impl std::fmt::Debug for CalibrationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationController")
            .field("config", &self.config)
            .field("started", &self.started)
            .field("complete", &self.complete)
            .field("samples", &self.samples.len())
            .field("next_exposure", &self.next_exposure)
            .finish_non_exhaustive()
    }
}
