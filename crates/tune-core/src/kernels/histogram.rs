//! Intensity histogram of 8-bit frames.

use crate::error::KernelError;
use crate::frame::{Frame, HistogramStats, PixelFormat};

/// One bucket per 8-bit intensity.
pub const DEFAULT_BIN_COUNT: u32 = 256;

/// Check that `bin_count` is a power of two in `2..=256`.
pub fn validate_bin_count(bin_count: u32) -> Result<(), KernelError> {
    if (2..=256).contains(&bin_count) && bin_count.is_power_of_two() {
        Ok(())
    } else {
        Err(KernelError::BinCount(bin_count))
    }
}

/// Compute histogram statistics over every pixel of a `Gray8` frame.
///
/// A pixel lands in bucket `px >> (8 - log2(bin_count))`. The mode is the
/// first bucket holding the maximum count; the median is the first bucket at
/// which the running count reaches half the pixel count.
pub fn compute(frame: &Frame, bin_count: u32) -> Result<HistogramStats, KernelError> {
    validate_bin_count(bin_count)?;
    if frame.format != PixelFormat::Gray8 {
        return Err(KernelError::UnsupportedFormat(frame.format.name()));
    }
    frame.check_geometry()?;

    let shift = 8 - bin_count.trailing_zeros();
    let mut bins = vec![0u32; 256];
    let mut min_value = u8::MAX;
    let mut max_value = u8::MIN;
    let mut total: u64 = 0;

    for &px in &frame.data {
        bins[usize::from(px >> shift)] += 1;
        min_value = min_value.min(px);
        max_value = max_value.max(px);
        total += u64::from(px);
    }

    let size = frame.data.len();
    let half = (size / 2) as u64;
    let mut mode_bin = 0u32;
    let mut median_bin = None;
    let mut acc: u64 = 0;
    for i in 0..bin_count {
        let count = bins[i as usize];
        if bins[mode_bin as usize] < count {
            mode_bin = i;
        }
        acc += u64::from(count);
        if median_bin.is_none() && acc >= half {
            median_bin = Some(i);
        }
    }

    Ok(HistogramStats {
        bins,
        bin_count,
        min_value,
        max_value,
        average: total as f64 / size as f64,
        median_bin: median_bin.unwrap_or(bin_count - 1),
        mode_bin,
    })
}

/// Attaches [`HistogramStats`] to each frame.
#[derive(Debug, Clone)]
pub struct HistogramKernel {
    bin_count: u32,
}

impl HistogramKernel {
    /// Kernel with a validated bin count.
    pub fn new(bin_count: u32) -> Result<Self, KernelError> {
        validate_bin_count(bin_count)?;
        Ok(Self { bin_count })
    }

    /// Buckets in use.
    pub fn bin_count(&self) -> u32 {
        self.bin_count
    }

    /// Compute the histogram and store it in `frame.meta`.
    pub fn annotate(&self, frame: &mut Frame) -> Result<(), KernelError> {
        let stats = compute(frame, self.bin_count)?;
        tracing::trace!(
            bins = stats.bin_count,
            min = stats.min_value,
            max = stats.max_value,
            avg = stats.average,
            median = stats.bin_value(stats.median_bin),
            mode = stats.mode_value(),
            "histogram"
        );
        frame.meta.histogram = Some(stats);
        Ok(())
    }
}

impl Default for HistogramKernel {
    fn default() -> Self {
        Self {
            bin_count: DEFAULT_BIN_COUNT,
        }
    }
}
