//! Fire-and-forget control events and the control-plane flush signal.

use super::envelope::{CorrelationId, Direction, Envelope, QueryKind};
use super::query::{decode_set_control, encode_set_control, DecodeProfile, SetControlQuery};
use crate::control::ControlRef;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Tag carried by every flush signal.
pub const FLUSH_TAG: &str = "sensor-tune-flush";

/// A set-control that expects no reply.
///
/// The receiver applies the same validation and flush handling as for the
/// query form and simply discards the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent(pub SetControlQuery);

impl ControlEvent {
    /// Event form of a set-control query.
    pub fn set_control(
        target: ControlRef,
        value: crate::control::ControlValue,
        flush: bool,
    ) -> Self {
        Self(SetControlQuery {
            target,
            value,
            flush,
        })
    }

    /// Encode as a set-control envelope with [`Direction::Event`].
    pub fn encode(&self) -> Envelope {
        let query = &self.0;
        let mut env = encode_set_control(
            CorrelationId(0),
            &query.target,
            query.value.clone(),
            query.flush,
        );
        env.direction = Direction::Event;
        env
    }

    /// Decode with the receiver's strict rules. Requests and replies are refused.
    pub fn decode(env: &Envelope) -> Result<Self, ProtocolError> {
        if env.direction != Direction::Event {
            return Err(ProtocolError::Malformed(format!(
                "expected an event envelope, found {:?}",
                env.direction
            )));
        }
        env.expect_kind(QueryKind::SetControl)?;
        decode_set_control(env, DecodeProfile::Receiver).map(Self)
    }
}

/// Out-of-band request to reset accumulation state.
///
/// Raised by the mediator before a flushing set reaches the device. Stages
/// that keep running sums or counters reset them on receipt; buffered frames
/// are handled by the mediator's drop logic, not by the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushSignal {
    /// Always [`FLUSH_TAG`].
    pub tag: String,
    /// The control whose change triggered the flush.
    pub control: ControlRef,
}

impl FlushSignal {
    /// Flush signal for a change of `control`.
    pub fn new(control: ControlRef) -> Self {
        Self {
            tag: FLUSH_TAG.to_string(),
            control,
        }
    }

    /// Whether a tagged event is a flush signal.
    pub fn matches(tag: &str) -> bool {
        tag == FLUSH_TAG
    }
}

/// A stage that keeps per-stream accumulation state.
pub trait FlushListener {
    /// Reset accumulation state.
    fn on_flush(&mut self, signal: &FlushSignal);
}
