//! Encoders and decoders for the three control queries.
//!
//! Every decoder takes a [`DecodeProfile`]:
//!
//! - [`DecodeProfile::Sender`] is used by the party that issued a query and
//!   reads back the reply. It is lenient: fields that are absent are left
//!   unset, and decoding succeeds as long as the primary payload (the value,
//!   or the range for control info) is present.
//! - [`DecodeProfile::Receiver`] is used by the party that acts on a query.
//!   It is strict: the target must be resolvable and every field the kind
//!   carries must be present.
//!
//! On top of the envelope functions sit the typed [`ControlRequest`] and
//! [`ControlReply`] records, which always decode with the profile matching
//! their direction.

use super::envelope::*;
use crate::control::{
    ControlDescriptor, ControlFlags, ControlRef, ControlType, ControlValue, ExtendedInfo,
};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// How strictly a decoder treats missing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeProfile {
    /// Lenient; reading back a reply.
    Sender,
    /// Strict; validating a request before acting on it.
    Receiver,
}

/// Decoded set-control fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetControlQuery {
    /// Control being set.
    pub target: ControlRef,
    /// Requested value.
    pub value: ControlValue,
    /// Start a flush before the value reaches the device.
    pub flush: bool,
}

/// Decoded get-control fields. `value` is only present on replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetControlQuery {
    /// Control being read.
    pub target: ControlRef,
    /// Value reported by the receiver.
    pub value: Option<ControlValue>,
}

/// Decoded control-info fields. `descriptor` is only present on replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfoQuery {
    /// Control being described.
    pub target: ControlRef,
    /// Description reported by the receiver.
    pub descriptor: Option<ControlDescriptor>,
}

// =============================================================================
// Shared helpers
// =============================================================================

fn write_target(env: &mut Envelope, target: &ControlRef) {
    if let Some(name) = &target.name {
        env.set(NAME, Field::Str(name.clone()));
    }
    env.set(ID, Field::UInt(u64::from(target.id)));
}

fn read_target(env: &Envelope, profile: DecodeProfile) -> Result<ControlRef, ProtocolError> {
    let name = env.str(NAME)?.map(str::to_string);
    let id = match env.uint(ID)? {
        Some(raw) => u32::try_from(raw).map_err(|_| ProtocolError::FieldType {
            field: ID,
            expected: "u32",
        })?,
        None => 0,
    };
    let target = ControlRef { name, id };
    if profile == DecodeProfile::Receiver && !target.is_resolvable() {
        return Err(ProtocolError::NoTarget);
    }
    Ok(target)
}

fn required<T>(field: Option<T>, key: &'static str) -> Result<T, ProtocolError> {
    field.ok_or(ProtocolError::MissingField(key))
}

// =============================================================================
// SetControl
// =============================================================================

/// Build a set-control request.
pub fn encode_set_control(
    correlation: CorrelationId,
    target: &ControlRef,
    value: ControlValue,
    flush: bool,
) -> Envelope {
    let mut env = Envelope::new(QueryKind::SetControl, Direction::Request, correlation);
    write_target(&mut env, target);
    env.set(VALUE, Field::Value(value));
    env.set(FLUSH, Field::Bool(flush));
    env
}

/// Read set-control fields from a request or reply.
///
/// The receiver requires `flush`; the sender treats it as false when absent.
pub fn decode_set_control(
    env: &Envelope,
    profile: DecodeProfile,
) -> Result<SetControlQuery, ProtocolError> {
    env.expect_kind(QueryKind::SetControl)?;
    let target = read_target(env, profile)?;
    let value = required(env.value(VALUE)?, VALUE)?.clone();
    let flush = match profile {
        DecodeProfile::Sender => env.bool(FLUSH)?.unwrap_or(false),
        DecodeProfile::Receiver => required(env.bool(FLUSH)?, FLUSH)?,
    };
    Ok(SetControlQuery {
        target,
        value,
        flush,
    })
}

/// Record that the receiver started a flush for this set.
pub fn mark_flushing(env: &mut Envelope) -> Result<(), ProtocolError> {
    env.expect_kind(QueryKind::SetControl)?;
    env.set(FLUSH, Field::Bool(true));
    Ok(())
}

/// False for any kind other than set-control.
pub fn is_flushing(env: &Envelope) -> bool {
    env.kind == QueryKind::SetControl && matches!(env.bool(FLUSH), Ok(Some(true)))
}

// =============================================================================
// GetControl
// =============================================================================

/// Build a get-control request.
pub fn encode_get_control(correlation: CorrelationId, target: &ControlRef) -> Envelope {
    let mut env = Envelope::new(QueryKind::GetControl, Direction::Request, correlation);
    write_target(&mut env, target);
    env
}

/// Read get-control fields. Replies must carry the value.
pub fn decode_get_control(
    env: &Envelope,
    profile: DecodeProfile,
) -> Result<GetControlQuery, ProtocolError> {
    env.expect_kind(QueryKind::GetControl)?;
    let target = read_target(env, profile)?;
    let value = env.value(VALUE)?.cloned();
    if profile == DecodeProfile::Sender && value.is_none() {
        return Err(ProtocolError::MissingField(VALUE));
    }
    Ok(GetControlQuery { target, value })
}

// =============================================================================
// ControlInfo
// =============================================================================

/// Build a control-info request.
pub fn encode_control_info(correlation: CorrelationId, target: &ControlRef) -> Envelope {
    let mut env = Envelope::new(QueryKind::ControlInfo, Direction::Request, correlation);
    write_target(&mut env, target);
    env
}

/// Write descriptor fields; the extended block only when present.
fn write_descriptor(env: &mut Envelope, descriptor: &ControlDescriptor) {
    env.set(NAME, Field::Str(descriptor.name.clone()));
    env.set(ID, Field::UInt(u64::from(descriptor.id)));
    env.set(CONTROL_TYPE, Field::UInt(u64::from(descriptor.control_type.code())));
    env.set(MIN, Field::Int(descriptor.minimum));
    env.set(MAX, Field::Int(descriptor.maximum));
    env.set(STEP, Field::UInt(descriptor.step));
    env.set(DEFAULT_VALUE, Field::Int(descriptor.default_value));
    env.set(FLAGS, Field::UInt(u64::from(descriptor.flags.bits())));
    match &descriptor.extended {
        Some(ext) => {
            env.set(EXTENDED, Field::Bool(true));
            env.set(ELEM_SIZE, Field::UInt(u64::from(ext.element_size)));
            env.set(ELEMS, Field::UInt(u64::from(ext.element_count)));
            env.set(NR_OF_DIMS, Field::UInt(ext.dimensions.len() as u64));
            env.set(DIMS, Field::List(ext.dimensions.clone()));
        }
        None => env.set(EXTENDED, Field::Bool(false)),
    }
}

fn narrow(raw: u64, field: &'static str) -> Result<u32, ProtocolError> {
    u32::try_from(raw).map_err(|_| ProtocolError::FieldType {
        field,
        expected: "u32",
    })
}

/// Decode the simple descriptor fields.
///
/// A request carries no descriptor, so `descriptor` is `None` whenever the
/// range is absent. The receiver profile additionally insists that a partial
/// descriptor is complete.
pub fn decode_control_info(
    env: &Envelope,
    profile: DecodeProfile,
) -> Result<ControlInfoQuery, ProtocolError> {
    env.expect_kind(QueryKind::ControlInfo)?;
    let target = read_target(env, profile)?;

    let minimum = env.int(MIN)?;
    let maximum = env.int(MAX)?;
    let has_descriptor = minimum.is_some() || maximum.is_some();
    if !has_descriptor {
        if profile == DecodeProfile::Sender {
            return Err(ProtocolError::MissingField(MIN));
        }
        return Ok(ControlInfoQuery {
            target,
            descriptor: None,
        });
    }

    let minimum = required(minimum, MIN)?;
    let maximum = required(maximum, MAX)?;
    let (step, default_value, flags, type_code) = match profile {
        DecodeProfile::Sender => (
            env.uint(STEP)?.unwrap_or(1),
            env.int(DEFAULT_VALUE)?.unwrap_or(minimum),
            env.uint(FLAGS)?.unwrap_or(0),
            env.uint(CONTROL_TYPE)?.unwrap_or(1),
        ),
        DecodeProfile::Receiver => (
            required(env.uint(STEP)?, STEP)?,
            required(env.int(DEFAULT_VALUE)?, DEFAULT_VALUE)?,
            required(env.uint(FLAGS)?, FLAGS)?,
            required(env.uint(CONTROL_TYPE)?, CONTROL_TYPE)?,
        ),
    };

    let descriptor = ControlDescriptor {
        id: target.id,
        name: target.name.clone().unwrap_or_default(),
        control_type: ControlType::from_code(narrow(type_code, CONTROL_TYPE)?),
        minimum,
        maximum,
        step,
        default_value,
        flags: ControlFlags::from_bits_retain(narrow(flags, FLAGS)?),
        extended: None,
    };

    Ok(ControlInfoQuery {
        target,
        descriptor: Some(descriptor),
    })
}

/// Whether a control-info envelope carries the extended block.
pub fn is_extended(env: &Envelope) -> Result<bool, ProtocolError> {
    env.expect_kind(QueryKind::ControlInfo)?;
    Ok(env.bool(EXTENDED)?.unwrap_or(false))
}

/// Decode a descriptor including its extended block.
///
/// Fails with [`ProtocolError::NotExtended`] when the envelope is a simple
/// reply; callers check [`is_extended`] first when both forms are acceptable.
pub fn decode_control_info_extended(
    env: &Envelope,
    profile: DecodeProfile,
) -> Result<ControlDescriptor, ProtocolError> {
    if !is_extended(env)? {
        return Err(ProtocolError::NotExtended);
    }
    let info = decode_control_info(env, profile)?;
    let mut descriptor = required(info.descriptor, MIN)?;

    let element_size = narrow(required(env.uint(ELEM_SIZE)?, ELEM_SIZE)?, ELEM_SIZE)?;
    let element_count = narrow(required(env.uint(ELEMS)?, ELEMS)?, ELEMS)?;
    let dimension_count = required(env.uint(NR_OF_DIMS)?, NR_OF_DIMS)?;
    let dimensions = required(env.list(DIMS)?, DIMS)?.to_vec();
    if dimensions.len() as u64 != dimension_count {
        return Err(ProtocolError::Malformed(format!(
            "{NR_OF_DIMS} is {dimension_count} but {DIMS} lists {} entries",
            dimensions.len()
        )));
    }

    descriptor.extended = Some(ExtendedInfo {
        element_size,
        element_count,
        dimensions,
    });
    Ok(descriptor)
}

// =============================================================================
// Typed records
// =============================================================================

/// A control query as the receiver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Apply a value.
    SetControl(SetControlQuery),
    /// Read a value.
    GetControl(ControlRef),
    /// Describe a control.
    ControlInfo(ControlRef),
}

impl ControlRequest {
    /// Query kind of this request.
    pub fn kind(&self) -> QueryKind {
        match self {
            ControlRequest::SetControl(_) => QueryKind::SetControl,
            ControlRequest::GetControl(_) => QueryKind::GetControl,
            ControlRequest::ControlInfo(_) => QueryKind::ControlInfo,
        }
    }

    /// Control the request addresses.
    pub fn target(&self) -> &ControlRef {
        match self {
            ControlRequest::SetControl(query) => &query.target,
            ControlRequest::GetControl(target) | ControlRequest::ControlInfo(target) => target,
        }
    }

    /// Encode as a request envelope.
    pub fn encode(&self, correlation: CorrelationId) -> Envelope {
        match self {
            ControlRequest::SetControl(query) => {
                encode_set_control(correlation, &query.target, query.value.clone(), query.flush)
            }
            ControlRequest::GetControl(target) => encode_get_control(correlation, target),
            ControlRequest::ControlInfo(target) => encode_control_info(correlation, target),
        }
    }

    /// Strict decode of an incoming request.
    pub fn decode(env: &Envelope) -> Result<Self, ProtocolError> {
        let profile = DecodeProfile::Receiver;
        Ok(match env.kind {
            QueryKind::SetControl => ControlRequest::SetControl(decode_set_control(env, profile)?),
            QueryKind::GetControl => {
                ControlRequest::GetControl(decode_get_control(env, profile)?.target)
            }
            QueryKind::ControlInfo => {
                ControlRequest::ControlInfo(decode_control_info(env, profile)?.target)
            }
        })
    }
}

/// Answer to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// `achieved` is the value in effect after the set.
    SetControl {
        /// Control that was set, resolved by the receiver.
        target: ControlRef,
        /// Value read back after the set.
        achieved: ControlValue,
        /// Whether the set started a flush.
        flushing: bool,
    },
    /// Current value of a control.
    GetControl {
        /// Control that was read.
        target: ControlRef,
        /// Its current value.
        value: ControlValue,
    },
    /// Full description, extended block included when present.
    ControlInfo(ControlDescriptor),
}

impl ControlReply {
    /// Query kind this reply answers.
    pub fn kind(&self) -> QueryKind {
        match self {
            ControlReply::SetControl { .. } => QueryKind::SetControl,
            ControlReply::GetControl { .. } => QueryKind::GetControl,
            ControlReply::ControlInfo(_) => QueryKind::ControlInfo,
        }
    }

    /// Encode as a reply envelope.
    pub fn encode(&self, correlation: CorrelationId) -> Envelope {
        let mut env = Envelope::new(self.kind(), Direction::Reply, correlation);
        match self {
            ControlReply::SetControl {
                target,
                achieved,
                flushing,
            } => {
                write_target(&mut env, target);
                env.set(VALUE, Field::Value(achieved.clone()));
                env.set(FLUSH, Field::Bool(*flushing));
            }
            ControlReply::GetControl { target, value } => {
                write_target(&mut env, target);
                env.set(VALUE, Field::Value(value.clone()));
            }
            ControlReply::ControlInfo(descriptor) => write_descriptor(&mut env, descriptor),
        }
        env
    }

    /// Lenient decode of a reply to a query of kind `expected`.
    pub fn decode(env: &Envelope, expected: QueryKind) -> Result<Self, ProtocolError> {
        env.expect_kind(expected)?;
        let profile = DecodeProfile::Sender;
        Ok(match expected {
            QueryKind::SetControl => {
                let query = decode_set_control(env, profile)?;
                ControlReply::SetControl {
                    target: query.target,
                    achieved: query.value,
                    flushing: query.flush,
                }
            }
            QueryKind::GetControl => {
                let query = decode_get_control(env, profile)?;
                ControlReply::GetControl {
                    target: query.target,
                    value: required(query.value, VALUE)?,
                }
            }
            QueryKind::ControlInfo => {
                let descriptor = if is_extended(env)? {
                    decode_control_info_extended(env, profile)?
                } else {
                    required(decode_control_info(env, profile)?.descriptor, MIN)?
                };
                ControlReply::ControlInfo(descriptor)
            }
        })
    }
}
