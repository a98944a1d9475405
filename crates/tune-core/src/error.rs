//! Error types shared by every sensor_tune crate.
//!
//! The taxonomy mirrors how failures travel through the control pipeline:
//!
//! - **`ProtocolError`**: a control-channel envelope was malformed, incomplete,
//!   or accessed as the wrong kind. Always local; the caller logs it and
//!   continues without the data.
//! - **`ValidationError`**: a requested value does not fit the control's
//!   declared type or range, or the control's flags forbid the access. Raised
//!   before the device transport is touched, so nothing is partially applied.
//! - **`TransportError`**: the device transport refused a query or a set.
//!   Terminal for the current request; the core never retries.
//! - **`KernelError`**: a numeric kernel could not produce statistics for a
//!   frame (unsupported pixel format, geometry mismatch). The frame is dropped.
//!
//! `TuneError` consolidates all of them (plus configuration and I/O failures)
//! so controllers and the pipeline can use `?` freely. Convergence outcomes
//! ("target reached", "domain exhausted") are *not* errors; see the
//! controller crate's `Flow` type.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Category of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Device node could not be opened or enumerated.
    Open,
    /// The device rejected or failed an ioctl-style call.
    Communication,
    /// The control id is not known to the device.
    UnknownControl,
    /// The device does not implement the requested query (e.g. extended info).
    Unsupported,
    /// Hardware reported a fault.
    Hardware,
    /// The device did not answer in time.
    Timeout,
    /// Access to the device node was denied.
    Permission,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransportErrorKind::Open => "open",
            TransportErrorKind::Communication => "communication",
            TransportErrorKind::UnknownControl => "unknown_control",
            TransportErrorKind::Unsupported => "unsupported",
            TransportErrorKind::Hardware => "hardware",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Permission => "permission",
            TransportErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a [`DeviceTransport`](crate::transport::DeviceTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct TransportError {
    /// Device the failure came from.
    pub device: String,
    /// Failure category.
    pub kind: TransportErrorKind,
    /// Detail for logs.
    pub message: String,
}

impl TransportError {
    /// Build an error for `device`.
    pub fn new(
        device: impl Into<String>,
        kind: TransportErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// Decoding or mutating a control-channel envelope failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The envelope is of a different kind than the accessor expects.
    #[error("expected a {expected} envelope, found {found}")]
    WrongKind {
        /// Kind label the accessor wanted.
        expected: &'static str,
        /// Kind label of the envelope.
        found: &'static str,
    },

    /// A field required by the decode profile is absent.
    #[error("envelope is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but carries a different value type.
    #[error("envelope field '{field}' has unexpected type, expected {expected}")]
    FieldType {
        /// Field key.
        field: &'static str,
        /// Type the accessor wanted.
        expected: &'static str,
    },

    /// Extended control-info fields were requested from a simple reply.
    #[error("control info envelope does not carry extended fields")]
    NotExtended,

    /// Neither a name nor a non-zero id identifies the target control.
    #[error("envelope does not identify a control (no name and id == 0)")]
    NoTarget,

    /// The reply does not answer the request it was matched against.
    #[error("reply correlation {reply} does not match request {request}")]
    CorrelationMismatch {
        /// Correlation sent with the request.
        request: u64,
        /// Correlation carried by the reply.
        reply: u64,
    },

    /// The wire form could not be parsed.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

// =============================================================================
// Validation Errors
// =============================================================================

/// A control access was rejected before reaching the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The name does not resolve through the control directory.
    #[error("no control named '{0}' in the control directory")]
    UnknownControl(String),

    /// The control is flagged disabled.
    #[error("control '{0}' is disabled")]
    Disabled(String),

    /// A set was addressed to a read-only control.
    #[error("control '{0}' is read-only")]
    ReadOnly(String),

    /// A get was addressed to a write-only control.
    #[error("control '{0}' is write-only")]
    WriteOnly(String),

    /// The control type cannot be driven through this pipeline
    /// (control classes, bitmasks, unknown types).
    #[error("control '{name}' has unsupported type {control_type}")]
    UnsupportedType {
        /// Control name.
        name: String,
        /// Display form of the declared type.
        control_type: String,
    },

    /// The value's shape (scalar, array, string) does not match the control.
    #[error("control '{name}' expects a {expected} value, got {found}")]
    ShapeMismatch {
        /// Control name.
        name: String,
        /// Shape the control takes.
        expected: &'static str,
        /// Shape of the offered value.
        found: &'static str,
    },

    /// A scalar, or an element of an array, lies outside the control range.
    #[error("value {value} for control '{name}' is outside [{min}, {max}]")]
    OutOfRange {
        /// Control name.
        name: String,
        /// Offending value.
        value: i64,
        /// Range minimum.
        min: i64,
        /// Range maximum.
        max: i64,
    },

    /// String length outside the range or off the step grid.
    #[error("string of length {len} for control '{name}' violates [{min}, {max}] step {step}")]
    StringLength {
        /// Control name.
        name: String,
        /// Length of the offered string.
        len: usize,
        /// Minimum length.
        min: i64,
        /// Maximum length.
        max: i64,
        /// Length granularity.
        step: u64,
    },

    /// Array length differs from the control's element count.
    #[error("array for control '{name}' has {found} elements, expected {expected}")]
    ElementCount {
        /// Control name.
        name: String,
        /// Declared element count.
        expected: u32,
        /// Elements offered.
        found: usize,
    },

    /// Array element size differs from the control's.
    #[error("array for control '{name}' has element size {found}, expected {expected}")]
    ElementSize {
        /// Control name.
        name: String,
        /// Declared element size in bytes.
        expected: u32,
        /// Element size offered.
        found: u32,
    },

    /// Arrays with more than one dimension are not handled.
    #[error("control '{name}' has {dims} dimensions, only 1-D arrays are supported")]
    MultiDimensional {
        /// Control name.
        name: String,
        /// Declared dimension count.
        dims: usize,
    },
}

// =============================================================================
// Kernel Errors
// =============================================================================

/// A statistics kernel rejected a frame or its own configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The kernel does not read this pixel format.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(&'static str),

    /// Column statistics need a single-row frame.
    #[error("frame height must be 1, got {0}")]
    HeightNotOne(u32),

    /// Row averaging needs whole groups of rows.
    #[error("frame height {height} is not a multiple of {rows} rows")]
    RowGrouping {
        /// Frame height.
        height: u32,
        /// Rows per group.
        rows: u32,
    },

    /// Payload length does not match width, height and format.
    #[error("frame payload holds {found} samples, geometry requires {expected}")]
    PayloadSize {
        /// Samples implied by the geometry.
        expected: usize,
        /// Samples present.
        found: usize,
    },

    /// Histogram bin count out of range.
    #[error("bin count {0} must be a power of two between 2 and 256")]
    BinCount(u32),

    /// Frame without pixels.
    #[error("frame is empty")]
    Empty,
}

// =============================================================================
// Application Error
// =============================================================================

/// Convenience alias for results using the application error type.
pub type TuneResult<T> = std::result::Result<T, TuneError>;

/// Primary error type for sensor_tune.
///
/// # Error Categories
///
/// 1. **Local, non-fatal** - `Protocol`, `Validation`
///    - Logged by the receiver; the request simply fails
///    - Recovery: the caller continues with the next frame
///
/// 2. **Stream-ending** - `Transport`, `Kernel`, `Controller`, `RequestFailed`
///    - Surface to the pipeline, which stops the stream
///
/// 3. **Startup** - `Configuration`, `Io`
///    - Abort before any frame is processed
#[derive(Error, Debug)]
pub enum TuneError {
    /// Malformed or incomplete control-channel envelope.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Rejected control access.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Device transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Statistics could not be computed for a frame.
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// A control-channel round trip found no handler willing to answer.
    ///
    /// Returned when the peer rejects the request (validation, protocol or
    /// transport failure on its side) without further detail.
    #[error("Control request for '{control}' was not answered: {reason}")]
    RequestFailed {
        /// Control the request addressed.
        control: String,
        /// What the peer or client reported.
        reason: String,
    },

    /// A closed-loop or calibration controller cannot continue.
    ///
    /// Covers missing metadata, a boundary hit with `stop_when_done`, an
    /// exhausted run budget in strict mode and similar stream-ending states.
    #[error("Controller '{controller}' failed: {message}")]
    Controller {
        /// Name of the controller.
        controller: &'static str,
        /// Why it stopped.
        message: String,
    },

    /// Semantic configuration error (values parse but make no sense).
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or directory operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TuneError {
    /// Shorthand for [`TuneError::Controller`].
    pub fn controller(controller: &'static str, message: impl Into<String>) -> Self {
        TuneError::Controller {
            controller,
            message: message.into(),
        }
    }

    /// True for the local, non-fatal categories (protocol and validation).
    pub fn is_local(&self) -> bool {
        matches!(self, TuneError::Protocol(_) | TuneError::Validation(_))
    }
}
