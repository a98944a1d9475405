//! Synchronous frame pipeline.
//!
//! ```text
//! MockSensor ─► Mediator (drop stale/settling) ─► FrameAverager ─► RowAverager
//!            ─► histogram + rolling-median metadata ─► FrameController
//!                     ▲                                       │
//!                     └──────── control queries ──────────────┘
//! ```
//!
//! Every stage runs on the calling thread. The controller reaches the device
//! only through the mediator's control channel, and the mediator notifies the
//! frame averager of every flushing update before it reaches the device.
//! A [`ManualClock`] advances by one frame interval per capture, so frame
//! timestamps and update times are deterministic.

use crate::config::DeviceConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tune_control::{Flow, FrameController, Termination};
use tune_core::kernels::{FrameAverager, HistogramKernel, MagicKernel, RowAverager, RowMode};
use tune_core::{Clock, Frame, ManualClock, PixelFormat, TuneResult};
use tune_driver_mock::{MockDevice, MockSensor};
use tune_mediator::{FrameVerdict, Mediator, MediatorConfig, SharedListener};

/// Frame accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames taken from the sensor.
    pub captured: u64,
    /// Dropped as captured before the last update.
    pub dropped_stale: u64,
    /// Dropped as the settling frame after an update.
    pub dropped_settling: u64,
    /// Swallowed by the frame averager while filling a block.
    pub averaging: u64,
    /// Handed to the controller.
    pub analysed: u64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// `None` when the frame budget ran out first.
    pub termination: Option<Termination>,
    /// Frame accounting at the end of the run.
    pub stats: PipelineStats,
}

/// Sensor, mediator, kernels and one controller wired into a frame loop
/// driven by a simulated clock.
pub struct Pipeline {
    mediator: Mediator,
    sensor: MockSensor,
    clock: Arc<ManualClock>,
    averager: Arc<Mutex<FrameAverager>>,
    rows: RowAverager,
    histogram: HistogramKernel,
    magic: MagicKernel,
    frame_interval_ns: u64,
    max_frames: u64,
    stats: PipelineStats,
}

impl Pipeline {
    /// Wire a pipeline around `device`. The mediator owns one handle to the
    /// device, the sensor reads through another.
    pub fn new(
        config: &DeviceConfig,
        mediator_config: MediatorConfig,
        device: MockDevice,
    ) -> TuneResult<Self> {
        let clock = Arc::new(ManualClock::new(0));
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let sensor = MockSensor::new(config.sensor.clone(), device.clone(), shared_clock.clone());
        let mut mediator = Mediator::new(Box::new(device), shared_clock, mediator_config);

        let averager = Arc::new(Mutex::new(FrameAverager::new(config.averaging_frames)));
        let listener: SharedListener = averager.clone();
        mediator.subscribe(listener);

        let rows = RowAverager::new(match config.row_group {
            0 => RowMode::Total,
            rows => RowMode::Group(rows),
        });

        Ok(Self {
            mediator,
            sensor,
            clock,
            averager,
            rows,
            histogram: HistogramKernel::new(config.histogram_bins)?,
            magic: MagicKernel,
            frame_interval_ns: config.frame_interval_ms.saturating_mul(1_000_000),
            max_frames: config.max_frames,
            stats: PipelineStats::default(),
        })
    }

    /// Open the device and load its control directory.
    pub fn start(&mut self) -> TuneResult<usize> {
        let controls = self.mediator.start()?;
        self.stats = PipelineStats::default();
        self.averager.lock().reset();
        tracing::info!(controls, "pipeline started");
        Ok(controls)
    }

    /// The mediator owning the device.
    pub fn mediator(&self) -> &Mediator {
        &self.mediator
    }

    /// Mutable access for direct control queries.
    pub fn mediator_mut(&mut self) -> &mut Mediator {
        &mut self.mediator
    }

    /// The frame source.
    pub fn sensor(&self) -> &MockSensor {
        &self.sensor
    }

    /// Frame accounting so far.
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Capture one frame and run it through every stage up to the controller.
    ///
    /// `None` when the frame was dropped or absorbed by averaging.
    pub fn next_frame(&mut self) -> TuneResult<Option<Frame>> {
        self.clock.advance(self.frame_interval_ns);
        let frame = self.sensor.capture();
        self.stats.captured += 1;

        match self.mediator.process_frame(&frame) {
            FrameVerdict::Pass => {}
            FrameVerdict::DropStale => {
                self.stats.dropped_stale += 1;
                return Ok(None);
            }
            FrameVerdict::DropSettling => {
                self.stats.dropped_settling += 1;
                return Ok(None);
            }
        }

        let Some(averaged) = self.averager.lock().push(frame)? else {
            self.stats.averaging += 1;
            return Ok(None);
        };

        let mut frame = self.rows.apply(&averaged)?;
        if frame.format == PixelFormat::Gray8 {
            self.histogram.annotate(&mut frame)?;
        }
        self.magic.annotate(&mut frame)?;
        self.stats.analysed += 1;
        Ok(Some(frame))
    }

    /// Feed frames to `controller` until it finishes, fails, or the frame
    /// budget is spent.
    pub fn run(&mut self, controller: &mut dyn FrameController) -> TuneResult<RunReport> {
        let span = tracing::info_span!("run", controller = controller.name());
        let _enter = span.enter();

        for _ in 0..self.max_frames {
            let Some(frame) = self.next_frame()? else {
                continue;
            };
            let flow = controller
                .process_frame(&frame, &mut self.mediator)
                .inspect_err(|err| {
                    tracing::error!(error = %err, sequence = frame.sequence, "controller failed");
                })?;
            if let Flow::Finished(termination) = flow {
                tracing::info!(?termination, stats = ?self.stats, "end of stream");
                return Ok(RunReport {
                    termination: Some(termination),
                    stats: self.stats,
                });
            }
        }

        tracing::warn!(max_frames = self.max_frames, "frame budget exhausted");
        Ok(RunReport {
            termination: None,
            stats: self.stats,
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("mediator", &self.mediator)
            .field("now_ns", &self.clock.now_ns())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
