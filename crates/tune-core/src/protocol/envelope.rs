//! Wire form of control-channel messages.
//!
//! An [`Envelope`] is a kind tag plus a map of named, typed fields. Requests
//! and replies are separate envelopes joined by a [`CorrelationId`]; the
//! replier never mutates the request it received.

use crate::control::ControlValue;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Joins a reply to the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three query kinds carried by the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Apply a value, optionally starting a flush.
    SetControl,
    /// Read the current value.
    GetControl,
    /// Describe a control.
    ControlInfo,
}

impl QueryKind {
    /// Stable lowercase label used in logs and errors.
    pub fn label(self) -> &'static str {
        match self {
            QueryKind::SetControl => "set-control",
            QueryKind::GetControl => "get-control",
            QueryKind::ControlInfo => "control-info",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Role of an envelope on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Expects a reply.
    Request,
    /// Answers the request with the same correlation.
    Reply,
    /// Fire-and-forget; no reply is produced.
    Event,
}

/// One typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Field {
    /// Control names and other text.
    Str(String),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer, also used for ids and flags.
    UInt(u64),
    /// Flag.
    Bool(bool),
    /// A control payload.
    Value(ControlValue),
    /// Array dimensions.
    List(Vec<u32>),
}

impl Field {
    fn type_name(&self) -> &'static str {
        match self {
            Field::Str(_) => "string",
            Field::Int(_) => "int",
            Field::UInt(_) => "uint",
            Field::Bool(_) => "bool",
            Field::Value(_) => "value",
            Field::List(_) => "list",
        }
    }
}

// Field keys
/// Control name.
pub const NAME: &str = "name";
/// Numeric control id.
pub const ID: &str = "id";
/// Control payload.
pub const VALUE: &str = "value";
/// Start a flush with the set.
pub const FLUSH: &str = "flush";
/// Control type label.
pub const CONTROL_TYPE: &str = "type";
/// Range minimum.
pub const MIN: &str = "min";
/// Range maximum.
pub const MAX: &str = "max";
/// Control flag bits.
pub const FLAGS: &str = "flags";
/// Default value.
pub const DEFAULT_VALUE: &str = "default_value";
/// Range step.
pub const STEP: &str = "step";
/// Marks an info reply carrying the extended block.
pub const EXTENDED: &str = "extended";
/// Bytes per array element.
pub const ELEM_SIZE: &str = "elem_size";
/// Array element count.
pub const ELEMS: &str = "elems";
/// Number of array dimensions.
pub const NR_OF_DIMS: &str = "nr_of_dims";
/// Array dimensions.
pub const DIMS: &str = "dims";

/// A control-channel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Shared by a request and its reply.
    pub correlation: CorrelationId,
    /// Which query this envelope carries.
    pub kind: QueryKind,
    /// Request, reply or event.
    pub direction: Direction,
    fields: BTreeMap<String, Field>,
}

impl Envelope {
    /// Envelope with no fields.
    pub fn new(kind: QueryKind, direction: Direction, correlation: CorrelationId) -> Self {
        Self {
            correlation,
            kind,
            direction,
            fields: BTreeMap::new(),
        }
    }

    /// Empty reply envelope answering `request`.
    pub fn reply_to(request: &Envelope) -> Self {
        Self::new(request.kind, Direction::Reply, request.correlation)
    }

    /// Builder form of [`Envelope::set`].
    pub fn with(mut self, key: &str, field: Field) -> Self {
        self.set(key, field);
        self
    }

    /// Insert or replace a field.
    pub fn set(&mut self, key: &str, field: Field) {
        self.fields.insert(key.to_string(), field);
    }

    /// Whether `key` is present, whatever its type.
    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Raw access to a field.
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    /// Take a field out, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Field> {
        self.fields.remove(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fail with [`ProtocolError::WrongKind`] unless the envelope is `kind`.
    pub fn expect_kind(&self, kind: QueryKind) -> Result<(), ProtocolError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(ProtocolError::WrongKind {
                expected: kind.label(),
                found: self.kind.label(),
            })
        }
    }

    /// String field.
    ///
    /// `Ok(None)` when absent, [`ProtocolError::FieldType`] when present with
    /// another type. The other typed getters follow the same rule.
    pub fn str(&self, key: &'static str) -> Result<Option<&str>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::Str(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(type_error(key, "string")),
        }
    }

    /// Signed integer field. Unsigned values that fit are accepted.
    pub fn int(&self, key: &'static str) -> Result<Option<i64>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::Int(v)) => Ok(Some(*v)),
            Some(Field::UInt(v)) => i64::try_from(*v)
                .map(Some)
                .map_err(|_| type_error(key, "int")),
            Some(_) => Err(type_error(key, "int")),
        }
    }

    /// Unsigned integer field. Non-negative signed values are accepted.
    pub fn uint(&self, key: &'static str) -> Result<Option<u64>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::UInt(v)) => Ok(Some(*v)),
            Some(Field::Int(v)) => u64::try_from(*v)
                .map(Some)
                .map_err(|_| type_error(key, "uint")),
            Some(_) => Err(type_error(key, "uint")),
        }
    }

    /// Boolean field.
    pub fn bool(&self, key: &'static str) -> Result<Option<bool>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::Bool(v)) => Ok(Some(*v)),
            Some(_) => Err(type_error(key, "bool")),
        }
    }

    /// Control payload field.
    pub fn value(&self, key: &'static str) -> Result<Option<&ControlValue>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::Value(v)) => Ok(Some(v)),
            Some(_) => Err(type_error(key, "value")),
        }
    }

    /// Dimension list field.
    pub fn list(&self, key: &'static str) -> Result<Option<&[u32]>, ProtocolError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Field::List(v)) => Ok(Some(v.as_slice())),
            Some(_) => Err(type_error(key, "list")),
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Parse the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

fn type_error(field: &'static str, expected: &'static str) -> ProtocolError {
    ProtocolError::FieldType { field, expected }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.kind, self.direction, self.correlation)?;
        for (key, field) in &self.fields {
            write!(f, " {key}=<{}>", field.type_name())?;
        }
        Ok(())
    }
}
