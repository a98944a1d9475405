//! Per-frame numeric kernels.
//!
//! Pure functions over a frame's samples plus two small stateful stages.
//! The statistics they attach are what the controllers read, so field
//! semantics (bucket index vs intensity, integer vs float averages) matter.

pub mod averaging;
pub mod coldiff;
pub mod histogram;
pub mod magic;

pub use averaging::{FrameAverager, RowAverager, RowMode};
pub use histogram::HistogramKernel;
pub use magic::MagicKernel;
