//! Device control data model.
//!
//! A *control* is a named, typed, range-bounded device parameter such as
//! exposure time or analog gain. [`ControlDescriptor`] describes one control
//! as reported by the device, [`ControlValue`] carries a value of any supported
//! shape, and [`ControlRef`] names a control in a request (by id, or by name
//! when the id is 0).
//!
//! # Compound controls
//!
//! Controls flagged [`ControlFlags::HAS_PAYLOAD`] carry an array (or a
//! variable length string) instead of a scalar. Their descriptors include an
//! [`ExtendedInfo`] block with the element size in bytes, the element count
//! and the dimension list.
//!
//! ```rust
//! use tune_core::control::{ControlDescriptor, ControlType};
//!
//! let name = "Exposure Time, Absolute";
//! let exposure = ControlDescriptor::builder(0x009a_0902, name, ControlType::Integer)
//!     .range(10, 100_000)
//!     .step(1)
//!     .default_value(1_000)
//!     .build();
//! assert!(exposure.contains(5_000));
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric control identifier. `0` is reserved for "resolve by name".
pub type ControlId = u32;

/// Declared type of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    /// 32-bit signed integer.
    Integer,
    /// On/off switch.
    Boolean,
    /// Index into a list of named choices.
    Menu,
    /// Action without state.
    Button,
    /// 64-bit signed integer.
    Integer64,
    /// Heading that groups the controls after it.
    CtrlClass,
    /// Text value.
    String,
    /// Set of independent bits.
    Bitmask,
    /// Index into a list of integer choices.
    IntegerMenu,
    /// Raw type code the pipeline does not recognise.
    Unknown(u32),
}

impl ControlType {
    /// Map a V4L2-style numeric type code.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ControlType::Integer,
            2 => ControlType::Boolean,
            3 => ControlType::Menu,
            4 => ControlType::Button,
            5 => ControlType::Integer64,
            6 => ControlType::CtrlClass,
            7 => ControlType::String,
            8 => ControlType::Bitmask,
            9 => ControlType::IntegerMenu,
            other => ControlType::Unknown(other),
        }
    }

    /// Inverse of [`ControlType::from_code`].
    pub fn code(self) -> u32 {
        match self {
            ControlType::Integer => 1,
            ControlType::Boolean => 2,
            ControlType::Menu => 3,
            ControlType::Button => 4,
            ControlType::Integer64 => 5,
            ControlType::CtrlClass => 6,
            ControlType::String => 7,
            ControlType::Bitmask => 8,
            ControlType::IntegerMenu => 9,
            ControlType::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlType::Integer => write!(f, "integer"),
            ControlType::Boolean => write!(f, "boolean"),
            ControlType::Menu => write!(f, "menu"),
            ControlType::Button => write!(f, "button"),
            ControlType::Integer64 => write!(f, "integer64"),
            ControlType::CtrlClass => write!(f, "ctrl_class"),
            ControlType::String => write!(f, "string"),
            ControlType::Bitmask => write!(f, "bitmask"),
            ControlType::IntegerMenu => write!(f, "integer_menu"),
            ControlType::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

bitflags! {
    /// Control flag bits, numerically compatible with V4L2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ControlFlags: u32 {
        /// Ignored by the device; never touched by the pipeline.
        const DISABLED = 0x0001;
        /// Temporarily locked by another user.
        const GRABBED = 0x0002;
        /// Cannot be set.
        const READ_ONLY = 0x0004;
        /// Settable but currently without effect.
        const INACTIVE = 0x0010;
        /// Cannot be read back.
        const WRITE_ONLY = 0x0040;
        /// Compound control carrying an array or string payload.
        const HAS_PAYLOAD = 0x0100;
    }
}

/// Array geometry of a compound control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedInfo {
    /// Size of one element in bytes (1, 2, 4 or 8).
    pub element_size: u32,
    /// Total number of elements.
    pub element_count: u32,
    /// Size of each dimension; its length is the dimension count.
    pub dimensions: Vec<u32>,
}

impl ExtendedInfo {
    /// One-dimensional array of `element_count` elements.
    pub fn array(element_size: u32, element_count: u32) -> Self {
        Self {
            element_size,
            element_count,
            dimensions: vec![element_count],
        }
    }

    /// Number of array dimensions.
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }
}

/// A device-adjustable parameter as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    /// Device-assigned id.
    pub id: ControlId,
    /// Human-readable name, matched case-insensitively.
    pub name: String,
    /// Declared value type.
    pub control_type: ControlType,
    /// Range minimum; per element for arrays.
    pub minimum: i64,
    /// Range maximum; per element for arrays.
    pub maximum: i64,
    /// Granularity of valid values.
    pub step: u64,
    /// Value after reset. For correction tables this is the neutral gain.
    pub default_value: i64,
    /// Access and state bits.
    pub flags: ControlFlags,
    /// Present for compound controls when the device supports extended queries.
    pub extended: Option<ExtendedInfo>,
}

impl ControlDescriptor {
    /// Start building a descriptor with an empty range and step 1.
    pub fn builder(
        id: ControlId,
        name: impl Into<String>,
        control_type: ControlType,
    ) -> ControlDescriptorBuilder {
        ControlDescriptorBuilder::new(id, name, control_type)
    }

    /// Carries an array or string payload.
    pub fn is_compound(&self) -> bool {
        self.flags.contains(ControlFlags::HAS_PAYLOAD)
    }

    /// Flagged [`ControlFlags::DISABLED`].
    pub fn is_disabled(&self) -> bool {
        self.flags.contains(ControlFlags::DISABLED)
    }

    /// Flagged [`ControlFlags::READ_ONLY`].
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(ControlFlags::READ_ONLY)
    }

    /// Flagged [`ControlFlags::WRITE_ONLY`].
    pub fn is_write_only(&self) -> bool {
        self.flags.contains(ControlFlags::WRITE_ONLY)
    }

    /// Inclusive range check against `[minimum, maximum]`.
    pub fn contains(&self, value: i64) -> bool {
        value >= self.minimum && value <= self.maximum
    }

    /// Clamp `value` into `[minimum, maximum]`.
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.minimum, self.maximum.max(self.minimum))
    }

    /// `minimum <= default <= maximum`, where bounds are meaningful.
    ///
    /// Buttons, control classes and strings carry no numeric bounds.
    pub fn bounds_consistent(&self) -> bool {
        match self.control_type {
            ControlType::Button | ControlType::CtrlClass | ControlType::String => true,
            _ if self.is_compound() => self.minimum <= self.maximum,
            _ => self.minimum <= self.default_value && self.default_value <= self.maximum,
        }
    }

    /// Descriptor without the extended block, as a device lacking extended
    /// queries would report it.
    pub fn simple(&self) -> ControlDescriptor {
        ControlDescriptor {
            extended: None,
            ..self.clone()
        }
    }
}

/// Builder for [`ControlDescriptor`].
#[derive(Debug, Clone)]
pub struct ControlDescriptorBuilder {
    descriptor: ControlDescriptor,
}

impl ControlDescriptorBuilder {
    /// Same as [`ControlDescriptor::builder`].
    pub fn new(id: ControlId, name: impl Into<String>, control_type: ControlType) -> Self {
        Self {
            descriptor: ControlDescriptor {
                id,
                name: name.into(),
                control_type,
                minimum: 0,
                maximum: 0,
                step: 1,
                default_value: 0,
                flags: ControlFlags::empty(),
                extended: None,
            },
        }
    }

    /// Inclusive value range.
    pub fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.descriptor.minimum = minimum;
        self.descriptor.maximum = maximum;
        self
    }

    /// Value granularity.
    pub fn step(mut self, step: u64) -> Self {
        self.descriptor.step = step;
        self
    }

    /// Reset value.
    pub fn default_value(mut self, value: i64) -> Self {
        self.descriptor.default_value = value;
        self
    }

    /// Add flag bits; bits already set are kept.
    pub fn flags(mut self, flags: ControlFlags) -> Self {
        self.descriptor.flags |= flags;
        self
    }

    /// Mark the control as compound with the given geometry.
    pub fn array(mut self, info: ExtendedInfo) -> Self {
        self.descriptor.flags |= ControlFlags::HAS_PAYLOAD;
        self.descriptor.extended = Some(info);
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> ControlDescriptor {
        self.descriptor
    }
}

/// Payload of a compound integer control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayValue {
    /// Size of one element in bytes.
    pub element_size: u32,
    /// Element values, widened to `i64`.
    pub elements: Vec<i64>,
}

impl ArrayValue {
    /// Array with explicit element size.
    pub fn new(element_size: u32, elements: Vec<i64>) -> Self {
        Self {
            element_size,
            elements,
        }
    }

    /// Array of `i32` values (element size 4).
    pub fn from_i32(values: &[i32]) -> Self {
        Self::new(4, values.iter().map(|&v| i64::from(v)).collect())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True for a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Payload size in bytes.
    pub fn byte_size(&self) -> usize {
        self.elements.len() * self.element_size as usize
    }
}

/// A control value of any supported shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ControlValue {
    /// Value of an integer, menu or boolean control.
    Integer(i32),
    /// Value of a 64-bit integer control.
    Integer64(i64),
    /// Switch state.
    Boolean(bool),
    /// Payload of a string control.
    String(String),
    /// Payload of a compound integer control.
    Array(ArrayValue),
}

impl ControlValue {
    /// Short name of the value's shape, used in diagnostics.
    pub fn shape_name(&self) -> &'static str {
        match self {
            ControlValue::Integer(_) => "integer",
            ControlValue::Integer64(_) => "integer64",
            ControlValue::Boolean(_) => "boolean",
            ControlValue::String(_) => "string",
            ControlValue::Array(_) => "array",
        }
    }

    /// Scalar view of integer-like values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ControlValue::Integer(v) => Some(i64::from(*v)),
            ControlValue::Integer64(v) => Some(*v),
            ControlValue::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Scalar view narrowed to `i32`; `None` when it does not fit.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ControlValue::Integer(v) => Some(*v),
            ControlValue::Boolean(v) => Some(i32::from(*v)),
            ControlValue::Integer64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Compound payload, if any.
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            ControlValue::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Integer(v) => write!(f, "{v}"),
            ControlValue::Integer64(v) => write!(f, "{v}"),
            ControlValue::Boolean(v) => write!(f, "{v}"),
            ControlValue::String(v) => write!(f, "{v:?}"),
            ControlValue::Array(a) => write!(f, "[{} x {}B]", a.len(), a.element_size),
        }
    }
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        ControlValue::Integer(value)
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Boolean(value)
    }
}

/// Names the control a request is about.
///
/// An `id` of 0 means the receiver resolves the control by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlRef {
    /// Control name, used when `id` is 0.
    pub name: Option<String>,
    /// Control id, or 0 to resolve by name.
    pub id: ControlId,
}

impl ControlRef {
    /// Reference resolved by name on the receiving side.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: 0,
        }
    }

    /// Reference by numeric id.
    pub fn by_id(id: ControlId) -> Self {
        Self { name: None, id }
    }

    /// True when the receiver has something to resolve.
    pub fn is_resolvable(&self) -> bool {
        self.id != 0 || self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.id) {
            (Some(name), 0) => write!(f, "{name}"),
            (Some(name), id) => write!(f, "{name} (0x{id:08x})"),
            (None, id) => write!(f, "0x{id:08x}"),
        }
    }
}
