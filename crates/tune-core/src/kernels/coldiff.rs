//! Normalised RMS of neighbour-column differences.

use crate::error::KernelError;
use crate::frame::{Frame, MagicErrorStats};

/// `sqrt(sum((v[i] - v[i+1])^2) / (n - 1) * 10000) / average`.
///
/// The 10000 factor scales the figure up a hundredfold for readability.
/// A non-positive average yields `f64::INFINITY` (worst score).
pub fn normalised_rms(values: &[i64], average: f64) -> Result<f64, KernelError> {
    if values.len() < 2 {
        return Err(KernelError::Empty);
    }
    let sum: f64 = values
        .windows(2)
        .map(|pair| {
            let d = (pair[0] - pair[1]) as f64;
            d * d
        })
        .sum();
    let rms = (sum / (values.len() - 1) as f64 * 10_000.0).sqrt();
    if average <= 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(rms / average)
}

/// Column difference from rolling-median error metadata.
pub fn from_magic(stats: &MagicErrorStats) -> Result<f64, KernelError> {
    let errors: Vec<i64> = stats.error.iter().map(|&e| i64::from(e)).collect();
    normalised_rms(&errors, f64::from(stats.average))
}

/// Column difference computed straight from a single-row frame.
pub fn from_pixels(frame: &Frame) -> Result<f64, KernelError> {
    if frame.height != 1 {
        return Err(KernelError::HeightNotOne(frame.height));
    }
    let samples = frame.samples()?;
    let values: Vec<i64> = samples.iter().map(|&v| i64::from(v)).collect();
    let mean = values.iter().sum::<i64>() as f64 / values.len() as f64;
    normalised_rms(&values, mean)
}
