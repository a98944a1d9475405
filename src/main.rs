//! CLI entry point for sensor-tune.
//!
//! Runs each controller against the simulated sensor:
//!
//! ```bash
//! sensor-tune controls
//! sensor-tune pid --target 180 --target-type absolute-maximum
//! sensor-tune sweep --policy max-average --min 0 --max 200
//! sensor-tune calibrate --write-to ./out
//! sensor-tune print-config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mimalloc::MiMalloc;
use sensor_tune::config::{TuneConfig, DEFAULT_CONFIG_PATH};
use sensor_tune::pipeline::{Pipeline, RunReport};
use sensor_tune::tracing_setup::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use tune_control::{
    CalibrationController, FrameController, PidController, ScorePolicy, SweepController,
    TargetType,
};
use tune_core::PixelFormat;
use tune_driver_mock::MockDevice;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "sensor-tune")]
#[command(
    about = "Closed-loop sensor tuning and fixed-pattern-noise calibration",
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override application.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override application.log_format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliTargetType {
    Average,
    AbsoluteMinimum,
    AbsoluteMaximum,
}

impl From<CliTargetType> for TargetType {
    fn from(value: CliTargetType) -> Self {
        match value {
            CliTargetType::Average => TargetType::Average,
            CliTargetType::AbsoluteMinimum => TargetType::AbsoluteMinimum,
            CliTargetType::AbsoluteMaximum => TargetType::AbsoluteMaximum,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliPolicy {
    None,
    MinColumnDifference,
    MaxAverage,
    MinAverage,
    MaxMode,
    MinMode,
}

impl From<CliPolicy> for ScorePolicy {
    fn from(value: CliPolicy) -> Self {
        match value {
            CliPolicy::None => ScorePolicy::None,
            CliPolicy::MinColumnDifference => ScorePolicy::MinColumnDifference,
            CliPolicy::MaxAverage => ScorePolicy::MaxAverage,
            CliPolicy::MinAverage => ScorePolicy::MinAverage,
            CliPolicy::MaxMode => ScorePolicy::MaxMode,
            CliPolicy::MinMode => ScorePolicy::MinMode,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the device's controls with their current values
    Controls,

    /// Drive a control until a histogram figure reaches the target
    Pid {
        #[arg(long)]
        control: Option<String>,
        #[arg(long)]
        target: Option<u32>,
        #[arg(long, value_enum)]
        target_type: Option<CliTargetType>,
        #[arg(long)]
        max_runs: Option<u32>,
        #[arg(long)]
        stop_when_done: bool,
    },

    /// Walk a control through its range and keep the best value
    Sweep {
        #[arg(long)]
        control: Option<String>,
        #[arg(long, value_enum)]
        policy: Option<CliPolicy>,
        #[arg(long)]
        min: Option<i64>,
        #[arg(long)]
        max: Option<i64>,
        #[arg(long)]
        step: Option<u32>,
    },

    /// Solve and apply a fixed-pattern-noise correction table
    Calibrate {
        /// Also write the table into this directory
        #[arg(long)]
        write_to: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TuneConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }

    match &cli.command {
        Commands::Controls => {}
        Commands::Pid {
            control,
            target,
            target_type,
            max_runs,
            stop_when_done,
        } => {
            if let Some(control) = control {
                config.pid.control_name = control.clone();
            }
            if let Some(target) = *target {
                config.pid.target_value = target;
            }
            if let Some(target_type) = *target_type {
                config.pid.target_type = target_type.into();
            }
            if let Some(max_runs) = *max_runs {
                config.pid.max_runs = max_runs;
            }
            config.pid.stop_when_done |= *stop_when_done;
        }
        Commands::Sweep {
            control,
            policy,
            min,
            max,
            step,
        } => {
            if let Some(control) = control {
                config.sweep.control_name = control.clone();
            }
            if let Some(policy) = *policy {
                config.sweep.policy = policy.into();
            }
            config.sweep.sweep_min = min.or(config.sweep.sweep_min);
            config.sweep.sweep_max = max.or(config.sweep.sweep_max);
            if let Some(step) = *step {
                config.sweep.step = step;
            }
        }
        Commands::Calibrate { write_to } => {
            if let Some(dir) = write_to {
                config.calibration.write_to_file = true;
                config.calibration.file_path = dir.clone();
            }
            // The usable intensity window is in 16-bit DN.
            if config.device.sensor.format == PixelFormat::Gray8 {
                config.device.sensor.format = PixelFormat::Gray16Le;
            }
        }
        Commands::PrintConfig => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
    }

    config.validate()?;
    tracing_setup::init(TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?)
        .map_err(anyhow::Error::msg)?;

    let device = MockDevice::image_sensor(&config.device.path, config.device.sensor.width);
    let mut pipeline = Pipeline::new(&config.device, config.mediator, device.clone())?;
    pipeline.start()?;
    tracing::info!(
        name = %config.application.name,
        device = %config.device.path,
        width = config.device.sensor.width,
        height = config.device.sensor.height,
        format = config.device.sensor.format.name(),
        "device ready"
    );

    let report = match cli.command {
        Commands::Controls => {
            list_controls(&pipeline, &device);
            return Ok(());
        }
        Commands::Pid { .. } => run(&mut pipeline, PidController::new(config.pid))?,
        Commands::Sweep { .. } => run(&mut pipeline, SweepController::new(config.sweep))?,
        Commands::Calibrate { .. } => {
            let controller = CalibrationController::new(config.calibration).with_observer(
                Box::new(|report| {
                    println!(
                        "correction table: {} elements, {} bytes, applied: {}",
                        report.element_count, report.byte_size, report.success
                    );
                }),
            );
            run(&mut pipeline, controller)?
        }
        Commands::PrintConfig => return Ok(()),
    };

    match report.termination {
        Some(termination) => println!("finished: {termination:?}"),
        None => bail!("no result after {} frames", report.stats.captured),
    }
    println!(
        "frames: {} captured, {} analysed, {} stale, {} settling",
        report.stats.captured,
        report.stats.analysed,
        report.stats.dropped_stale,
        report.stats.dropped_settling
    );
    Ok(())
}

fn run(pipeline: &mut Pipeline, mut controller: impl FrameController) -> Result<RunReport> {
    let name = controller.name();
    pipeline
        .run(&mut controller)
        .with_context(|| format!("{name} run failed"))
}

fn list_controls(pipeline: &Pipeline, device: &MockDevice) {
    println!(
        "{:<34} {:<10} {:>8} {:>8} {:>6} {:>8}  value",
        "name", "type", "min", "max", "step", "default"
    );
    for control in pipeline.mediator().directory().list() {
        let value = device
            .value(&control.name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut flags = Vec::new();
        if control.is_disabled() {
            flags.push("disabled");
        }
        if control.is_read_only() {
            flags.push("read-only");
        }
        if control.is_compound() {
            flags.push("compound");
        }
        println!(
            "{:<34} {:<10} {:>8} {:>8} {:>6} {:>8}  {value} {}",
            control.name,
            control.control_type.to_string(),
            control.minimum,
            control.maximum,
            control.step,
            control.default_value,
            flags.join(",")
        );
    }
}
