//! Frames and the statistics attached to them.
//!
//! # Storage
//! Pixel data is a raw byte vector.
//! - `Gray8`: 1 byte per pixel.
//! - `Gray16Le` / `Gray16Be`: 2 bytes per pixel in the named byte order.
//!
//! Statistics produced by the numeric kernels live in [`FrameMeta`] and travel
//! with the frame. Cloning a frame clones its metadata: consumers address the
//! statistics, not the identity of the pixel buffer.

use crate::error::KernelError;
use serde::{Deserialize, Serialize};

/// Sample layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit luma.
    Gray8,
    /// 16-bit luma, little-endian.
    Gray16Le,
    /// 16-bit luma, big-endian.
    Gray16Be,
}

impl PixelFormat {
    /// Storage size of one sample.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16Le | PixelFormat::Gray16Be => 2,
        }
    }

    /// Largest representable sample.
    pub fn max_value(self) -> u16 {
        match self {
            PixelFormat::Gray8 => u16::from(u8::MAX),
            PixelFormat::Gray16Le | PixelFormat::Gray16Be => u16::MAX,
        }
    }

    /// Caps-style format name.
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Gray16Le => "GRAY16_LE",
            PixelFormat::Gray16Be => "GRAY16_BE",
        }
    }
}

/// Histogram of an 8-bit frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    /// 256 counters; only the first `bin_count` are populated.
    pub bins: Vec<u32>,
    /// Number of buckets in use (power of two, 2..=256).
    pub bin_count: u32,
    /// Darkest sample.
    pub min_value: u8,
    /// Brightest sample.
    pub max_value: u8,
    /// Mean intensity.
    pub average: f64,
    /// First bucket whose cumulative count reaches half the pixels.
    pub median_bin: u32,
    /// First bucket holding the maximum count.
    pub mode_bin: u32,
}

impl HistogramStats {
    /// Intensity span covered by one bucket.
    pub fn bin_width(&self) -> u32 {
        256 / self.bin_count.max(1)
    }

    /// Intensity at the lower edge of bucket `index`.
    pub fn bin_value(&self, index: u32) -> u32 {
        index * self.bin_width()
    }

    /// Intensity at the lower edge of the mode bucket.
    pub fn mode_value(&self) -> u32 {
        self.bin_value(self.mode_bin)
    }

    /// Percentage of `pixel_count` that falls in the mode bucket.
    pub fn mode_percentage(&self, pixel_count: usize) -> f64 {
        if pixel_count == 0 {
            return 0.0;
        }
        let count = self.bins.get(self.mode_bin as usize).copied().unwrap_or(0);
        100.0 * f64::from(count) / pixel_count as f64
    }
}

/// Per-column rolling-median baseline and deviation from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicErrorStats {
    /// Smoothed baseline, one entry per column.
    pub rolling_median: Vec<i32>,
    /// Column value minus its baseline.
    pub error: Vec<i32>,
    /// Number of analysed columns.
    pub column_count: u32,
    /// Integer mean of the analysed row.
    pub average: i32,
}

/// Statistics attached to a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Set by the histogram kernel on 8-bit frames.
    pub histogram: Option<HistogramStats>,
    /// Set by the column statistics kernel on single-row frames.
    pub magic: Option<MagicErrorStats>,
}

/// A single video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
    /// Capture time in nanoseconds on the pipeline clock.
    pub timestamp_ns: u64,
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// Sample layout of `data`.
    pub format: PixelFormat,
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Attached statistics.
    pub meta: FrameMeta,
}

impl Frame {
    /// Create an 8-bit frame.
    pub fn from_u8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::from_bytes(width, height, PixelFormat::Gray8, data)
    }

    /// Create a 16-bit little-endian frame, copying the samples.
    pub fn from_u16(width: u32, height: u32, pixels: &[u16]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 2);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }
        Self::from_bytes(width, height, PixelFormat::Gray16Le, data)
    }

    /// Frame over an already encoded payload. Geometry is not checked here.
    pub fn from_bytes(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            timestamp_ns: 0,
            width,
            height,
            format,
            data,
            meta: FrameMeta::default(),
        }
    }

    /// Set the sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the capture time.
    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// `width * height`.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Fail unless the payload holds exactly `width * height` samples.
    pub fn check_geometry(&self) -> Result<(), KernelError> {
        let expected = self.pixel_count() * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(KernelError::PayloadSize {
                expected,
                found: self.data.len(),
            });
        }
        if expected == 0 {
            return Err(KernelError::Empty);
        }
        Ok(())
    }

    /// Decode every sample to `u16`, honouring the byte order.
    pub fn samples(&self) -> Result<Vec<u16>, KernelError> {
        self.check_geometry()?;
        Ok(match self.format {
            PixelFormat::Gray8 => self.data.iter().map(|&v| u16::from(v)).collect(),
            PixelFormat::Gray16Le => self
                .data
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
            PixelFormat::Gray16Be => self
                .data
                .chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect(),
        })
    }

    /// Re-encode `samples` into this frame's format, replacing the payload.
    pub fn store_samples(&mut self, samples: &[u16]) {
        self.data = encode_samples(self.format, samples);
    }

    /// Get pixel value at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.format.bytes_per_pixel();
        match self.format {
            PixelFormat::Gray8 => self.data.get(idx).map(|&v| u16::from(v)),
            PixelFormat::Gray16Le => {
                let bytes = self.data.get(idx..idx + 2)?;
                Some(u16::from_le_bytes([bytes[0], bytes[1]]))
            }
            PixelFormat::Gray16Be => {
                let bytes = self.data.get(idx..idx + 2)?;
                Some(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
        }
    }

    /// Calculate mean pixel value.
    pub fn mean(&self) -> f64 {
        match self.samples() {
            Ok(samples) => {
                let sum: u64 = samples.iter().map(|&v| u64::from(v)).sum();
                sum as f64 / samples.len() as f64
            }
            Err(_) => 0.0,
        }
    }
}

pub(crate) fn encode_samples(format: PixelFormat, samples: &[u16]) -> Vec<u8> {
    match format {
        PixelFormat::Gray8 => samples
            .iter()
            .map(|&v| u8::try_from(v).unwrap_or(u8::MAX))
            .collect(),
        PixelFormat::Gray16Le => samples.iter().flat_map(|v| v.to_le_bytes()).collect(),
        PixelFormat::Gray16Be => samples.iter().flat_map(|v| v.to_be_bytes()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u16_little_endian() {
        let frame = Frame::from_u16(2, 1, &[0x0102, 0xfffe]);
        assert_eq!(frame.data, vec![0x02, 0x01, 0xfe, 0xff]);
        assert_eq!(frame.get(1, 0), Some(0xfffe));
        assert_eq!(frame.get(2, 0), None);
    }

    #[test]
    fn test_big_endian_samples() {
        let frame = Frame::from_bytes(2, 1, PixelFormat::Gray16Be, vec![0x01, 0x02, 0x00, 0x10]);
        assert_eq!(frame.samples().unwrap(), vec![0x0102, 0x0010]);
    }

    #[test]
    fn test_geometry_mismatch() {
        let frame = Frame::from_u8(4, 2, vec![0; 7]);
        assert_eq!(
            frame.samples(),
            Err(KernelError::PayloadSize {
                expected: 8,
                found: 7
            })
        );
    }

    #[test]
    fn test_mean() {
        let frame = Frame::from_u8(4, 1, vec![0, 10, 20, 30]);
        assert!((frame.mean() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_store_samples_saturates_gray8() {
        let mut frame = Frame::from_u8(2, 1, vec![0, 0]);
        frame.store_samples(&[12, 300]);
        assert_eq!(frame.data, vec![12, 255]);
    }

    #[test]
    fn test_mode_percentage() {
        let mut bins = vec![0; 256];
        bins[3] = 96;
        bins[1] = 4;
        let stats = HistogramStats {
            bins,
            bin_count: 4,
            min_value: 0,
            max_value: 255,
            average: 180.0,
            median_bin: 3,
            mode_bin: 3,
        };
        assert_eq!(stats.bin_width(), 64);
        assert_eq!(stats.mode_value(), 192);
        assert!((stats.mode_percentage(100) - 96.0).abs() < 1e-9);
    }
}
