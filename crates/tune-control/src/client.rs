//! Typed control queries over a [`ControlChannel`].
//!
//! Every query gets a fresh correlation id; a reply carrying a different id
//! is rejected instead of being attributed to the wrong request.
//!
//! Control types learned from info replies are remembered so that integer
//! writes use the width the control declares.

use std::collections::HashMap;
use tune_core::protocol::{
    encode_control_info, encode_get_control, encode_set_control, ControlEvent, ControlReply,
    CorrelationId, Envelope, QueryKind,
};
use tune_core::{
    ControlChannel, ControlDescriptor, ControlRef, ControlType, ControlValue, ProtocolError,
    TuneError, TuneResult,
};

/// Typed request/reply helper used by every controller.
#[derive(Debug, Default)]
pub struct ControlClient {
    next_correlation: u64,
    types: HashMap<ControlRef, ControlType>,
}

impl ControlClient {
    /// Client with no known controls.
    pub fn new() -> Self {
        Self::default()
    }

    fn correlation(&mut self) -> CorrelationId {
        self.next_correlation += 1;
        CorrelationId(self.next_correlation)
    }

    fn exchange(
        &mut self,
        channel: &mut dyn ControlChannel,
        request: Envelope,
    ) -> TuneResult<ControlReply> {
        let kind = request.kind;
        let correlation = request.correlation;
        let reply = channel.round_trip(request)?;
        if reply.correlation != correlation {
            return Err(ProtocolError::CorrelationMismatch {
                request: correlation.0,
                reply: reply.correlation.0,
            }
            .into());
        }
        Ok(ControlReply::decode(&reply, kind)?)
    }

    /// Query the control's descriptor and remember its type.
    pub fn control_info(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
    ) -> TuneResult<ControlDescriptor> {
        let request = encode_control_info(self.correlation(), target);
        match self.exchange(channel, request)? {
            ControlReply::ControlInfo(descriptor) => {
                self.types.insert(target.clone(), descriptor.control_type);
                Ok(descriptor)
            }
            other => Err(unexpected(target, QueryKind::ControlInfo, &other)),
        }
    }

    /// Read the current value.
    pub fn get(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
    ) -> TuneResult<ControlValue> {
        let request = encode_get_control(self.correlation(), target);
        match self.exchange(channel, request)? {
            ControlReply::GetControl { value, .. } => Ok(value),
            other => Err(unexpected(target, QueryKind::GetControl, &other)),
        }
    }

    /// Set a value and return the value the device reports afterwards.
    pub fn set(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
        value: ControlValue,
        flush: bool,
    ) -> TuneResult<ControlValue> {
        let request = encode_set_control(self.correlation(), target, value, flush);
        match self.exchange(channel, request)? {
            ControlReply::SetControl { achieved, .. } => Ok(achieved),
            other => Err(unexpected(target, QueryKind::SetControl, &other)),
        }
    }

    /// Read a scalar value.
    pub fn get_int(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
    ) -> TuneResult<i64> {
        let value = self.get(channel, target)?;
        scalar(target, &value)
    }

    /// Write a scalar value, shaped for the control's declared type.
    ///
    /// A control not seen through [`ControlClient::control_info`] yet is
    /// queried once first.
    pub fn set_int(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
        value: i64,
        flush: bool,
    ) -> TuneResult<i64> {
        let control_type = match self.types.get(target) {
            Some(control_type) => *control_type,
            None => self.control_info(channel, target)?.control_type,
        };
        let value = scalar_value(control_type, value);
        let achieved = self.set(channel, target, value, flush)?;
        scalar(target, &achieved)
    }

    /// Fire-and-forget set; the outcome is not reported back.
    pub fn send_set_event(
        &mut self,
        channel: &mut dyn ControlChannel,
        target: &ControlRef,
        value: ControlValue,
        flush: bool,
    ) -> TuneResult<()> {
        channel.send_event(ControlEvent::set_control(target.clone(), value, flush).encode())
    }
}

/// 64-bit controls take `Integer64`; everything else takes `Integer` when
/// the value fits, so out-of-range values still reach range validation.
fn scalar_value(control_type: ControlType, value: i64) -> ControlValue {
    match control_type {
        ControlType::Integer64 => ControlValue::Integer64(value),
        _ => i32::try_from(value).map_or(ControlValue::Integer64(value), ControlValue::Integer),
    }
}

fn scalar(target: &ControlRef, value: &ControlValue) -> TuneResult<i64> {
    value.as_i64().ok_or_else(|| TuneError::RequestFailed {
        control: target.to_string(),
        reason: format!("expected a scalar value, got {}", value.shape_name()),
    })
}

fn unexpected(target: &ControlRef, expected: QueryKind, reply: &ControlReply) -> TuneError {
    TuneError::RequestFailed {
        control: target.to_string(),
        reason: format!(
            "expected a {} reply, got {}",
            expected.label(),
            reply.kind().label()
        ),
    }
}
