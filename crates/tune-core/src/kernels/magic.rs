//! Rolling-median column error ("magic" error).
//!
//! For each column of the first row, the baseline is the lower median of a
//! window of neighbouring pixels, and the error is the pixel's deviation from
//! that baseline. Column-to-column structure in the error is a proxy for the
//! sensor's fixed pattern noise.

use crate::error::KernelError;
use crate::frame::{Frame, MagicErrorStats};

/// Width of the median window.
pub const MEDIAN_WINDOW: usize = 50;

/// Compute rolling medians and errors for row 0 of `frame`.
///
/// The window for column `i` is `[i - 25, min(i + 25, width - 1))`, clipped at
/// zero. When the clipped window is empty (single-column frames) the pixel is
/// its own baseline.
pub fn compute(frame: &Frame) -> Result<MagicErrorStats, KernelError> {
    let samples = frame.samples()?;
    let width = frame.width as usize;
    let row = &samples[..width];

    let mut rolling_median = Vec::with_capacity(width);
    let mut error = Vec::with_capacity(width);
    let mut window: Vec<u16> = Vec::with_capacity(MEDIAN_WINDOW);
    let mut total: i64 = 0;

    for (i, &px) in row.iter().enumerate() {
        let lo = i.saturating_sub(MEDIAN_WINDOW / 2);
        let hi = (i + MEDIAN_WINDOW / 2).min(width - 1);

        let median = if hi > lo {
            window.clear();
            window.extend_from_slice(&row[lo..hi]);
            lower_median(&mut window)
        } else {
            px
        };

        rolling_median.push(i32::from(median));
        error.push(i32::from(px) - i32::from(median));
        total += i64::from(px);
    }

    let average = i32::try_from(total / width as i64).unwrap_or(i32::MAX);
    Ok(MagicErrorStats {
        rolling_median,
        error,
        column_count: frame.width,
        average,
    })
}

/// Element at index `(n - 1) / 2` of the sorted window.
fn lower_median(window: &mut [u16]) -> u16 {
    let mid = (window.len() - 1) / 2;
    let (_, median, _) = window.select_nth_unstable(mid);
    *median
}

/// Attaches [`MagicErrorStats`] to each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicKernel;

impl MagicKernel {
    /// Compute column statistics and store them in `frame.meta`.
    pub fn annotate(&self, frame: &mut Frame) -> Result<(), KernelError> {
        let stats = compute(frame)?;
        tracing::trace!(columns = stats.column_count, avg = stats.average, "magic error");
        frame.meta.magic = Some(stats);
        Ok(())
    }
}
