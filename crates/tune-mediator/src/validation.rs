//! Type and range validation of control accesses.
//!
//! Everything here runs before the transport is touched, so a rejected
//! request never partially applies.

use tune_core::{ControlDescriptor, ControlType, ControlValue, ValidationError};

/// Direction of a control access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Get.
    Read,
    /// Set.
    Write,
}

/// How a validated value reaches the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Single scalar (or short string) write.
    Simple,
    /// Array or variable-length payload write.
    Extended,
}

/// Reject disabled controls, sets on read-only and gets on write-only ones.
pub fn check_access(descriptor: &ControlDescriptor, access: Access) -> Result<(), ValidationError> {
    let name = || descriptor.name.clone();
    if descriptor.is_disabled() {
        return Err(ValidationError::Disabled(name()));
    }
    match access {
        Access::Write if descriptor.is_read_only() => Err(ValidationError::ReadOnly(name())),
        Access::Read if descriptor.is_write_only() => Err(ValidationError::WriteOnly(name())),
        _ => Ok(()),
    }
}

/// Check that `value` has the shape the control's type demands.
pub fn classify(
    descriptor: &ControlDescriptor,
    value: &ControlValue,
) -> Result<ValueKind, ValidationError> {
    let mismatch = |expected: &'static str| ValidationError::ShapeMismatch {
        name: descriptor.name.clone(),
        expected,
        found: value.shape_name(),
    };
    let unsupported = || ValidationError::UnsupportedType {
        name: descriptor.name.clone(),
        control_type: descriptor.control_type.to_string(),
    };

    if descriptor.is_compound() {
        return match (descriptor.control_type, value) {
            (ControlType::String, ControlValue::String(_)) => Ok(ValueKind::Extended),
            (ControlType::String, _) => Err(mismatch("string")),
            (ControlType::Integer | ControlType::Integer64, ControlValue::Array(_)) => {
                Ok(ValueKind::Extended)
            }
            (ControlType::Integer | ControlType::Integer64, _) => Err(mismatch("array")),
            _ => Err(unsupported()),
        };
    }

    match (descriptor.control_type, value) {
        // A button is pressed; whatever value came along is irrelevant.
        (ControlType::Button, _) => Ok(ValueKind::Simple),
        (
            ControlType::Integer | ControlType::Menu | ControlType::IntegerMenu,
            ControlValue::Integer(_),
        ) => Ok(ValueKind::Simple),
        (ControlType::Integer | ControlType::Menu | ControlType::IntegerMenu, _) => {
            Err(mismatch("integer"))
        }
        (ControlType::Boolean, ControlValue::Boolean(_)) => Ok(ValueKind::Simple),
        (ControlType::Boolean, _) => Err(mismatch("boolean")),
        (ControlType::Integer64, ControlValue::Integer64(_)) => Ok(ValueKind::Simple),
        (ControlType::Integer64, _) => Err(mismatch("integer64")),
        (ControlType::String, ControlValue::String(_)) => Ok(ValueKind::Simple),
        (ControlType::String, _) => Err(mismatch("string")),
        (ControlType::CtrlClass | ControlType::Bitmask | ControlType::Unknown(_), _) => {
            Err(unsupported())
        }
    }
}

/// `minimum <= len <= maximum` and `(len - minimum) % step == 0`.
fn check_string_length(descriptor: &ControlDescriptor, text: &str) -> Result<(), ValidationError> {
    let len = text.len();
    let step = descriptor.step.max(1);
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let ok = len_i >= descriptor.minimum
        && len_i <= descriptor.maximum
        && ((len_i - descriptor.minimum) as u64) % step == 0;
    if ok {
        Ok(())
    } else {
        Err(ValidationError::StringLength {
            name: descriptor.name.clone(),
            len,
            min: descriptor.minimum,
            max: descriptor.maximum,
            step: descriptor.step,
        })
    }
}

fn check_range(descriptor: &ControlDescriptor, value: i64) -> Result<(), ValidationError> {
    if descriptor.contains(value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            name: descriptor.name.clone(),
            value,
            min: descriptor.minimum,
            max: descriptor.maximum,
        })
    }
}

/// Full validation of a value about to be written.
///
/// Compound integer controls need the extended block in `descriptor`; the
/// array must be one-dimensional, carry exactly `element_count` elements of
/// `element_size` bytes, and every element must lie in `[minimum, maximum]`.
pub fn validate(
    descriptor: &ControlDescriptor,
    value: &ControlValue,
) -> Result<ValueKind, ValidationError> {
    let kind = classify(descriptor, value)?;

    match value {
        _ if descriptor.control_type == ControlType::Button => {}
        ControlValue::String(text) => check_string_length(descriptor, text)?,
        ControlValue::Array(array) => {
            let ext = descriptor
                .extended
                .as_ref()
                .ok_or_else(|| ValidationError::UnsupportedType {
                    name: descriptor.name.clone(),
                    control_type: format!("{} array without geometry", descriptor.control_type),
                })?;
            if ext.dimension_count() != 1 {
                return Err(ValidationError::MultiDimensional {
                    name: descriptor.name.clone(),
                    dims: ext.dimension_count(),
                });
            }
            if array.len() != ext.element_count as usize {
                return Err(ValidationError::ElementCount {
                    name: descriptor.name.clone(),
                    expected: ext.element_count,
                    found: array.len(),
                });
            }
            if array.element_size != ext.element_size {
                return Err(ValidationError::ElementSize {
                    name: descriptor.name.clone(),
                    expected: ext.element_size,
                    found: array.element_size,
                });
            }
            for &element in &array.elements {
                check_range(descriptor, element)?;
            }
        }
        scalar => {
            if let Some(v) = scalar.as_i64() {
                check_range(descriptor, v)?;
            }
        }
    }

    Ok(kind)
}
