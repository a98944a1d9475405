//! Core types for the sensor_tune control pipeline.
//!
//! - [`control`]: the device control data model
//! - [`protocol`]: control-channel envelopes, typed requests/replies, events
//! - [`frame`]: frames and their attached statistics
//! - [`kernels`]: histogram, rolling-median error, averaging, column difference
//! - [`transport`] / [`channel`]: the two seams to the outside world
//! - [`error`]: the shared error taxonomy

pub mod channel;
pub mod clock;
pub mod control;
pub mod error;
pub mod frame;
pub mod kernels;
pub mod protocol;
pub mod transport;

pub use channel::ControlChannel;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use control::{
    ArrayValue, ControlDescriptor, ControlFlags, ControlId, ControlRef, ControlType, ControlValue,
    ExtendedInfo,
};
pub use error::{
    KernelError, ProtocolError, TransportError, TransportErrorKind, TuneError, TuneResult,
    ValidationError,
};
pub use frame::{Frame, FrameMeta, HistogramStats, MagicErrorStats, PixelFormat};
pub use transport::DeviceTransport;
