//! Temporal (frame) and spatial (row) averaging.

use crate::error::KernelError;
use crate::frame::{Frame, PixelFormat};
use crate::protocol::{FlushListener, FlushSignal};

/// Averages blocks of `N` consecutive frames.
///
/// Frames are summed per pixel; the first `N - 1` frames of each block are
/// swallowed and the `N`th is replaced by the integer mean. A flush discards
/// the partial block so that no frame captured before a parameter change
/// contributes to an average emitted after it.
#[derive(Debug, Clone)]
pub struct FrameAverager {
    frames: u32,
    sums: Vec<u32>,
    count: u32,
    geometry: Option<(u32, u32, PixelFormat)>,
}

impl FrameAverager {
    /// Averager over blocks of `frames`; 0 is treated as 1.
    pub fn new(frames: u32) -> Self {
        Self {
            frames: frames.max(1),
            sums: Vec::new(),
            count: 0,
            geometry: None,
        }
    }

    /// Block size.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Frames accumulated in the current block.
    pub fn pending(&self) -> u32 {
        self.count
    }

    /// True when no partial sums are held.
    pub fn is_reset(&self) -> bool {
        self.count == 0 && self.sums.iter().all(|&s| s == 0)
    }

    /// Drop the partial block.
    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0);
        self.count = 0;
    }

    /// Add a frame. Returns the averaged frame once a block completes.
    pub fn push(&mut self, mut frame: Frame) -> Result<Option<Frame>, KernelError> {
        let samples = frame.samples()?;
        let geometry = (frame.width, frame.height, frame.format);
        if self.geometry != Some(geometry) {
            // Geometry change: start over with fresh sums.
            self.geometry = Some(geometry);
            self.sums = vec![0; samples.len()];
            self.count = 0;
        }

        for (sum, &px) in self.sums.iter_mut().zip(&samples) {
            *sum += u32::from(px);
        }
        self.count += 1;

        if self.count < self.frames {
            return Ok(None);
        }

        let averaged: Vec<u16> = self
            .sums
            .iter()
            .map(|&s| u16::try_from(s / self.frames).unwrap_or(u16::MAX))
            .collect();
        frame.store_samples(&averaged);
        self.reset();
        Ok(Some(frame))
    }
}

impl FlushListener for FrameAverager {
    fn on_flush(&mut self, signal: &FlushSignal) {
        tracing::debug!(control = %signal.control, pending = self.count, "frame averager flushed");
        self.reset();
    }
}

/// How [`RowAverager`] collapses rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMode {
    /// Average groups of this many consecutive rows.
    Group(u32),
    /// Average every row into a single output row.
    Total,
}

/// Averages rows of a frame column-wise.
#[derive(Debug, Clone, Copy)]
pub struct RowAverager {
    mode: RowMode,
}

impl RowAverager {
    /// Averager collapsing rows as `mode` says.
    pub fn new(mode: RowMode) -> Self {
        Self { mode }
    }

    /// Output height for an input of `height` rows.
    pub fn output_height(&self, height: u32) -> Result<u32, KernelError> {
        match self.mode {
            RowMode::Total => Ok(1),
            RowMode::Group(rows) if rows > 0 && height >= rows && height % rows == 0 => {
                Ok(height / rows)
            }
            RowMode::Group(rows) => Err(KernelError::RowGrouping { height, rows }),
        }
    }

    /// Averaged copy of `frame`; metadata is carried over unchanged.
    pub fn apply(&self, frame: &Frame) -> Result<Frame, KernelError> {
        let out_height = self.output_height(frame.height)?;
        let samples = frame.samples()?;
        let width = frame.width as usize;
        let group = (frame.height / out_height) as usize;

        let mut out = Vec::with_capacity(width * out_height as usize);
        for j in 0..out_height as usize {
            for i in 0..width {
                let sum: u32 = (0..group)
                    .map(|z| u32::from(samples[i + (j * group + z) * width]))
                    .sum();
                out.push(u16::try_from(sum / group as u32).unwrap_or(u16::MAX));
            }
        }

        let mut result = frame.clone();
        result.height = out_height;
        result.store_samples(&out);
        Ok(result)
    }
}
