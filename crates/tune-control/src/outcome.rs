//! Per-frame controller contract.

use tune_core::{ControlChannel, Frame, TuneResult};

/// How a controller ended its run. None of these is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The measured metric is within the allowed error of the target.
    TargetReached {
        /// Parameter value in effect.
        value: i64,
    },
    /// Converged as close as single steps allow. `saturated` marks the
    /// sensor-ceiling case (absolute minimum at 254 while reading 255).
    BestAchievable {
        /// Parameter value kept.
        value: i64,
        /// Stopped at the sensor ceiling.
        saturated: bool,
    },
    /// The parameter sits at a range limit and still needs to move past it.
    BoundaryReached {
        /// The limit the parameter sits at.
        value: i64,
    },
    /// The run budget is spent.
    RunsExhausted {
        /// Frames acted on.
        runs: u32,
    },
    /// The sweep covered its domain or hit an early-saturation rule.
    /// `best` is the committed value when a scoring policy is active.
    SweepComplete {
        /// Committed value, if any.
        best: Option<i64>,
        /// Ended before the sweep maximum.
        early: bool,
    },
    /// `solved` is false when too few usable exposures were collected.
    CalibrationComplete {
        /// A correction table was computed and applied.
        solved: bool,
    },
}

/// What the pipeline does after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Pass the frame on and keep going.
    Continue,
    /// End of stream.
    Finished(Termination),
}

impl Flow {
    /// True for [`Flow::Finished`].
    pub fn is_finished(&self) -> bool {
        matches!(self, Flow::Finished(_))
    }
}

/// A stage that looks at one frame at a time and adjusts the device through
/// the control channel.
///
/// # Contract
///
/// - Frames are presented in stream order, one at a time.
/// - At most one parameter change is committed per frame, except for final
///   corrective writes when the controller finishes.
/// - `Err` is stream-ending; `Ok(Flow::Finished)` is a normal end.
pub trait FrameController {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Look at one frame and issue at most one parameter change.
    fn process_frame(
        &mut self,
        frame: &Frame,
        channel: &mut dyn ControlChannel,
    ) -> TuneResult<Flow>;
}
