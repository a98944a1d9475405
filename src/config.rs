//! Configuration loading with Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults (every field has one)
//! 2. a TOML file (`config/tune.toml` unless another path is given)
//! 3. environment variables prefixed with `SENSOR_TUNE_`, nested keys
//!    separated by `__`
//!
//! # Example
//! ```no_run
//! use sensor_tune::config::TuneConfig;
//!
//! let config = TuneConfig::load()?;
//! config.validate()?;
//! println!("Target: {}", config.pid.target_value);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `SENSOR_TUNE_PID__TARGET_VALUE=200` overrides `pid.target_value`.

use crate::tracing_setup::{parse_log_level, OutputFormat};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tune_control::{CalibrationConfig, PidConfig, SweepConfig};
use tune_core::kernels::histogram::validate_bin_count;
use tune_core::{TuneError, TuneResult};
use tune_driver_mock::MockSensorConfig;
use tune_mediator::MediatorConfig;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/tune.toml";

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "SENSOR_TUNE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    /// `[application]`: name and logging.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// `[device]`: frame source and per-frame kernels.
    #[serde(default)]
    pub device: DeviceConfig,
    /// `[mediator]`: flush behaviour.
    #[serde(default)]
    pub mediator: MediatorConfig,
    /// `[pid]`
    #[serde(default)]
    pub pid: PidConfig,
    /// `[sweep]`
    #[serde(default)]
    pub sweep: SweepConfig,
    /// `[calibration]`
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name used in logs (default: "sensor-tune")
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (default: pretty)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Frame source and per-frame processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier handed to the transport (default: "mock0")
    #[serde(default = "default_device_path")]
    pub path: String,
    /// Simulated time between frames in milliseconds (default: 33)
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    /// Frames averaged into one (default: 1, no averaging)
    #[serde(default = "default_averaging_frames")]
    pub averaging_frames: u32,
    /// Rows averaged together; 0 collapses the frame to one row (default: 0)
    #[serde(default)]
    pub row_group: u32,
    /// Histogram buckets, power of two in 2..=256 (default: 256)
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: u32,
    /// Frames captured before a run gives up (default: 10000)
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,
    /// `[device.sensor]`: the simulated sensor.
    #[serde(default)]
    pub sensor: MockSensorConfig,
}

// Default value functions
fn default_name() -> String {
    "sensor-tune".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_path() -> String {
    "mock0".to_string()
}

fn default_frame_interval() -> u64 {
    33
}

fn default_averaging_frames() -> u32 {
    1
}

fn default_histogram_bins() -> u32 {
    256
}

fn default_max_frames() -> u64 {
    10_000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            frame_interval_ms: default_frame_interval(),
            averaging_frames: default_averaging_frames(),
            row_group: 0,
            histogram_bins: default_histogram_bins(),
            max_frames: default_max_frames(),
            sensor: MockSensorConfig::default(),
        }
    }
}

impl TuneConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack, exposed so callers can add their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> TuneResult<()> {
        parse_log_level(&self.application.log_level).map_err(TuneError::Configuration)?;

        let device = &self.device;
        if device.path.trim().is_empty() {
            return Err(TuneError::Configuration(
                "device.path must not be empty".to_string(),
            ));
        }
        if device.frame_interval_ms == 0 {
            return Err(TuneError::Configuration(
                "device.frame_interval_ms must be at least 1".to_string(),
            ));
        }
        if device.averaging_frames == 0 {
            return Err(TuneError::Configuration(
                "device.averaging_frames must be at least 1".to_string(),
            ));
        }
        validate_bin_count(device.histogram_bins).map_err(|_| {
            TuneError::Configuration(format!(
                "device.histogram_bins must be a power of two in 2..=256, got {}",
                device.histogram_bins
            ))
        })?;
        if device.sensor.width < 2 || device.sensor.height == 0 {
            return Err(TuneError::Configuration(format!(
                "device.sensor geometry {}x{} is too small",
                device.sensor.width, device.sensor.height
            )));
        }
        if device.row_group != 0 && device.sensor.height % device.row_group != 0 {
            return Err(TuneError::Configuration(format!(
                "device.row_group {} does not divide the frame height {}",
                device.row_group, device.sensor.height
            )));
        }

        self.pid.validate()?;
        self.sweep.validate()?;
        self.calibration.validate()?;
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
