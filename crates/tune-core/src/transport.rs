//! Device transport capability.
//!
//! The transport is the only path to real device state. Exactly one owner
//! (the mediator) holds it; everything else changes controls by sending
//! queries through a [`ControlChannel`](crate::channel::ControlChannel).

use crate::control::{ControlDescriptor, ControlId, ControlValue};
use crate::error::TransportError;

/// Capability: Device Control Access
///
/// Devices exposing named, typed, ranged controls.
///
/// # Contract
/// - `open()` is called once before any other method
/// - `query_control_directory()` lists every control the device knows,
///   including disabled ones; filtering is the caller's business
/// - `query_ext_control()` returns the descriptor with its extended block;
///   devices without extended queries return
///   [`TransportErrorKind::Unsupported`](crate::error::TransportErrorKind::Unsupported)
/// - `set_control()` returns the value now in effect, which may differ from
///   the requested one because of device-side rounding or clamping
/// - Failures are never retried by the caller
pub trait DeviceTransport: Send {
    /// Identifier used in logs and error messages (e.g. `/dev/video0`).
    fn device_id(&self) -> &str;

    /// Acquire the device.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Simple descriptors of every control.
    fn query_control_directory(&mut self) -> Result<Vec<ControlDescriptor>, TransportError>;

    /// Simple descriptor of one control.
    fn query_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError>;

    /// Descriptor including the extended (array geometry) block.
    fn query_ext_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError>;

    /// Current value. Compound controls return their whole payload.
    fn get_control(&mut self, id: ControlId) -> Result<ControlValue, TransportError>;

    /// Apply a validated value.
    ///
    /// # Returns
    /// - Ok(achieved) with the value actually in effect
    /// - Err when the device rejected or failed the write
    fn set_control(
        &mut self,
        id: ControlId,
        value: &ControlValue,
    ) -> Result<ControlValue, TransportError>;
}

impl<T: DeviceTransport + ?Sized> DeviceTransport for Box<T> {
    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn query_control_directory(&mut self) -> Result<Vec<ControlDescriptor>, TransportError> {
        (**self).query_control_directory()
    }

    fn query_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError> {
        (**self).query_control(id)
    }

    fn query_ext_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError> {
        (**self).query_ext_control(id)
    }

    fn get_control(&mut self, id: ControlId) -> Result<ControlValue, TransportError> {
        (**self).get_control(id)
    }

    fn set_control(
        &mut self,
        id: ControlId,
        value: &ControlValue,
    ) -> Result<ControlValue, TransportError> {
        (**self).set_control(id, value)
    }
}
