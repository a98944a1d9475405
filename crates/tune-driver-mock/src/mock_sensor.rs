//! Simulated image sensor.
//!
//! Renders frames from the current control values of a [`MockDevice`]:
//!
//! ```text
//! pixel[c] = exposure * sensitivity * (1 + gain / 20) * G[c] * fpnc[c] / denominator + noise
//! G[c]     = 1 + pattern[c] * (column_spread + 0.2 * |v_ramp - ramp_optimum| / 255)
//! ```
//!
//! Values are in 16-bit DN and divided by 256 for `Gray8`. `pattern` is a
//! fixed per-column profile in `[-1, 1]` drawn once from the seeded RNG, so
//! the column error grows linearly with brightness and is smallest at the
//! ramp optimum.

use crate::common::MockRng;
use crate::mock_device::{EXPOSURE, FPNC, GAIN, MockDevice, V_RAMP};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tune_core::{Clock, ControlValue, Frame, PixelFormat};

// =============================================================================
// Configuration
// =============================================================================

/// Synthetic sensor settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockSensorConfig {
    /// Frame width in pixels (default: 64)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels (default: 4)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Output pixel format (default: gray8)
    #[serde(default = "default_format")]
    pub format: PixelFormat,

    /// 16-bit DN per microsecond of exposure at zero gain (default: 1.0)
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Column gain spread at the ramp optimum (default: 0.03)
    #[serde(default = "default_column_spread")]
    pub column_spread: f64,

    /// V Ramp value with the least column pattern (default: 96)
    #[serde(default = "default_ramp_optimum")]
    pub ramp_optimum: i64,

    /// Peak noise amplitude in output DN (default: 1)
    #[serde(default = "default_noise")]
    pub noise: i32,

    /// Frames exposed but not yet delivered (default: 0)
    #[serde(default)]
    pub latency_frames: usize,

    /// Seed for the column pattern and noise; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_width() -> u32 {
    64
}
fn default_height() -> u32 {
    4
}
fn default_format() -> PixelFormat {
    PixelFormat::Gray8
}
fn default_sensitivity() -> f64 {
    1.0
}
fn default_column_spread() -> f64 {
    0.03
}
fn default_ramp_optimum() -> i64 {
    96
}
fn default_noise() -> i32 {
    1
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: default_format(),
            sensitivity: default_sensitivity(),
            column_spread: default_column_spread(),
            ramp_optimum: default_ramp_optimum(),
            noise: default_noise(),
            latency_frames: 0,
            seed: None,
        }
    }
}

// =============================================================================
// MockSensor
// =============================================================================

/// Frame source rendering the device's current exposure, gain and ramp
/// over a fixed column pattern.
pub struct MockSensor {
    config: MockSensorConfig,
    device: MockDevice,
    clock: Arc<dyn Clock>,
    rng: MockRng,
    pattern: Vec<f64>,
    in_flight: VecDeque<Frame>,
    sequence: u64,
}

impl MockSensor {
    /// The sensor reads controls straight from `device`; it never writes them.
    pub fn new(config: MockSensorConfig, device: MockDevice, clock: Arc<dyn Clock>) -> Self {
        let rng = MockRng::new(config.seed);
        let pattern = (0..config.width)
            .map(|_| f64::from(rng.noise(1000)) / 1000.0)
            .collect();
        Self {
            config,
            device,
            clock,
            rng,
            pattern,
            in_flight: VecDeque::new(),
            sequence: 0,
        }
    }

    /// Active settings.
    pub fn config(&self) -> &MockSensorConfig {
        &self.config
    }

    /// The fixed column profile in `[-1, 1]`.
    pub fn pattern(&self) -> &[f64] {
        &self.pattern
    }

    /// Column gain `G[c]` at the current V Ramp setting.
    pub fn column_gains(&self) -> Vec<f64> {
        let spread = self.spread();
        self.pattern.iter().map(|p| 1.0 + p * spread).collect()
    }

    fn spread(&self) -> f64 {
        let ramp = self.device.value_i64(V_RAMP).unwrap_or(self.config.ramp_optimum);
        let mismatch = (ramp - self.config.ramp_optimum).abs() as f64 / 255.0;
        self.config.column_spread + 0.2 * mismatch
    }

    /// Expose a frame with the current settings and deliver the oldest one in
    /// flight. Every frame is stamped with the clock at exposure.
    pub fn capture(&mut self) -> Frame {
        let frame = self.render();
        self.in_flight.push_back(frame);
        if self.in_flight.len() > self.config.latency_frames {
            if let Some(frame) = self.in_flight.pop_front() {
                return frame;
            }
        }
        // Pipeline still filling: deliver the oldest frame without consuming it.
        self.in_flight.front().cloned().unwrap_or_else(|| self.render())
    }

    fn render(&mut self) -> Frame {
        let exposure = self.device.value_i64(EXPOSURE).unwrap_or(0) as f64;
        let gain = self.device.value_i64(GAIN).unwrap_or(0) as f64;
        let denominator = self
            .device
            .descriptor(FPNC)
            .map(|d| d.default_value)
            .filter(|&d| d > 0)
            .unwrap_or(1) as f64;
        let correction: Vec<f64> = match self.device.value(FPNC) {
            Some(ControlValue::Array(array)) => array
                .elements
                .iter()
                .map(|&e| e as f64 / denominator)
                .collect(),
            _ => Vec::new(),
        };

        let base = exposure * self.config.sensitivity * (1.0 + gain / 20.0);
        let scale = match self.config.format {
            PixelFormat::Gray8 => 1.0 / 256.0,
            PixelFormat::Gray16Le | PixelFormat::Gray16Be => 1.0,
        };
        let max = f64::from(self.config.format.max_value());
        let gains = self.column_gains();

        let width = self.config.width as usize;
        let mut samples = Vec::with_capacity(width * self.config.height as usize);
        for _ in 0..self.config.height {
            for (c, g) in gains.iter().enumerate() {
                let k = correction.get(c).copied().unwrap_or(1.0);
                let value = base * g * k * scale + f64::from(self.rng.noise(self.config.noise));
                samples.push(value.round().clamp(0.0, max) as u16);
            }
        }

        let mut frame = Frame::from_bytes(
            self.config.width,
            self.config.height,
            self.config.format,
            Vec::new(),
        )
        .with_sequence(self.sequence)
        .with_timestamp(self.clock.now_ns());
        frame.store_samples(&samples);
        self.sequence += 1;
        frame
    }
}

impl std::fmt::Debug for MockSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensor")
            .field("config", &self.config)
            .field("device", &self.device.device_name())
            .field("in_flight", &self.in_flight.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}
