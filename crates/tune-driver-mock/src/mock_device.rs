//! In-memory device transport.
//!
//! `MockDevice` is a cheap handle: clones share the same control table, call
//! counters and fault injection state. Hand one clone to the mediator and
//! keep another to inspect what reached the "hardware".

use crate::common::ErrorConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tune_core::{
    ArrayValue, ControlDescriptor, ControlFlags, ControlId, ControlType, ControlValue,
    DeviceTransport, ExtendedInfo, TransportError, TransportErrorKind,
};

/// Exposure in microseconds.
pub const EXPOSURE: &str = "Exposure Time, Absolute";
/// Analog gain.
pub const GAIN: &str = "Gain";
/// Column amplifier ramp; the fixed pattern is weakest at its optimum.
pub const V_RAMP: &str = "V Ramp";
/// Per-column gain correction, one element per sensor column.
pub const FPNC: &str = "Fixed Pattern Noise Correction";
/// Read-only.
pub const SENSOR_TEMPERATURE: &str = "Sensor Temperature";
/// Disabled menu control.
pub const TEST_PATTERN: &str = "Test Pattern";

/// Number of calls per transport method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Calls to `open`.
    pub open: u32,
    /// Calls to `query_control_directory`.
    pub query_control_directory: u32,
    /// Calls to `query_control`.
    pub query_control: u32,
    /// Calls to `query_ext_control`.
    pub query_ext_control: u32,
    /// Calls to `get_control`.
    pub get_control: u32,
    /// Calls to `set_control`, failed ones included.
    pub set_control: u32,
}

#[derive(Debug, Clone)]
struct MockControl {
    descriptor: ControlDescriptor,
    value: ControlValue,
    /// Hardware granularity: achieved values are floored to multiples of this
    /// above the minimum, regardless of the advertised step.
    quantum: Option<u64>,
}

#[derive(Debug, Default)]
struct DeviceState {
    controls: Vec<MockControl>,
    calls: CallCounts,
    set_log: Vec<(ControlId, ControlValue)>,
}

impl DeviceState {
    fn find(&self, id: ControlId) -> Option<&MockControl> {
        self.controls.iter().find(|c| c.descriptor.id == id)
    }

    fn find_mut(&mut self, id: ControlId) -> Option<&mut MockControl> {
        self.controls.iter_mut().find(|c| c.descriptor.id == id)
    }
}

/// Device transport over an in-memory control table.
#[derive(Debug, Clone)]
pub struct MockDevice {
    device_id: String,
    state: Arc<Mutex<DeviceState>>,
    errors: ErrorConfig,
    extended_queries: bool,
}

impl MockDevice {
    /// Device without controls.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: Arc::new(Mutex::new(DeviceState::default())),
            errors: ErrorConfig::none(),
            extended_queries: true,
        }
    }

    /// Image sensor with exposure, gain, ramp and a `width`-column correction
    /// table, plus one read-only and one disabled control.
    pub fn image_sensor(device_id: impl Into<String>, width: u32) -> Self {
        let device = Self::new(device_id);
        device.add_control(
            ControlDescriptor::builder(0x0098_0911, EXPOSURE, ControlType::Integer)
                .range(10, 100_000)
                .step(1)
                .default_value(1_000)
                .build(),
            ControlValue::Integer(1_000),
        );
        device.add_control(
            ControlDescriptor::builder(0x0098_0913, GAIN, ControlType::Integer)
                .range(0, 100)
                .default_value(0)
                .build(),
            ControlValue::Integer(0),
        );
        device.add_control(
            ControlDescriptor::builder(0x009a_0a01, V_RAMP, ControlType::Integer)
                .range(0, 255)
                .default_value(40)
                .build(),
            ControlValue::Integer(40),
        );
        device.add_control(
            ControlDescriptor::builder(0x009a_0a02, FPNC, ControlType::Integer)
                .range(0, 8191)
                .default_value(4096)
                .array(ExtendedInfo::array(4, width))
                .build(),
            ControlValue::Array(ArrayValue::new(4, vec![4096; width as usize])),
        );
        device.add_control(
            ControlDescriptor::builder(0x009a_0a03, SENSOR_TEMPERATURE, ControlType::Integer)
                .range(-40, 125)
                .default_value(35)
                .flags(ControlFlags::READ_ONLY)
                .build(),
            ControlValue::Integer(35),
        );
        device.add_control(
            ControlDescriptor::builder(0x009a_0a04, TEST_PATTERN, ControlType::Menu)
                .range(0, 3)
                .default_value(0)
                .flags(ControlFlags::DISABLED)
                .build(),
            ControlValue::Integer(0),
        );
        device
    }

    /// Inject faults.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Make `query_ext_control` fail as unsupported.
    pub fn without_extended_queries(mut self) -> Self {
        self.extended_queries = false;
        self
    }

    /// Register a control with its current value.
    pub fn add_control(&self, descriptor: ControlDescriptor, value: ControlValue) {
        self.state.lock().controls.push(MockControl {
            descriptor,
            value,
            quantum: None,
        });
    }

    /// Coarsen the hardware granularity of a control.
    pub fn set_quantum(&self, name: &str, quantum: u64) {
        let mut state = self.state.lock();
        if let Some(control) = state
            .controls
            .iter_mut()
            .find(|c| c.descriptor.name.eq_ignore_ascii_case(name))
        {
            control.quantum = Some(quantum.max(1));
        }
    }

    /// Id given at construction.
    pub fn device_name(&self) -> &str {
        &self.device_id
    }

    /// Call counters so far.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Every accepted set, in order, with the achieved value.
    pub fn set_log(&self) -> Vec<(ControlId, ControlValue)> {
        self.state.lock().set_log.clone()
    }

    /// Full descriptor by name, bypassing counters.
    pub fn descriptor(&self, name: &str) -> Option<ControlDescriptor> {
        self.state
            .lock()
            .controls
            .iter()
            .find(|c| c.descriptor.name.eq_ignore_ascii_case(name))
            .map(|c| c.descriptor.clone())
    }

    /// Current value by name, bypassing counters and fault injection.
    pub fn value(&self, name: &str) -> Option<ControlValue> {
        self.state
            .lock()
            .controls
            .iter()
            .find(|c| c.descriptor.name.eq_ignore_ascii_case(name))
            .map(|c| c.value.clone())
    }

    /// Scalar form of [`MockDevice::value`].
    pub fn value_i64(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(|v| v.as_i64())
    }

    /// Overwrite a value directly, as if changed on the device itself.
    pub fn force_value(&self, name: &str, value: ControlValue) {
        let mut state = self.state.lock();
        if let Some(control) = state
            .controls
            .iter_mut()
            .find(|c| c.descriptor.name.eq_ignore_ascii_case(name))
        {
            control.value = value;
        }
    }

    fn unknown(&self, id: ControlId) -> TransportError {
        TransportError::new(
            &self.device_id,
            TransportErrorKind::UnknownControl,
            format!("no control with id 0x{id:08x}"),
        )
    }
}

/// Round a scalar to what the hardware can represent.
fn quantise(control: &MockControl, requested: i64) -> i64 {
    let d = &control.descriptor;
    let clamped = d.clamp(requested);
    let offset = clamped - d.minimum;
    let achieved = match control.quantum {
        Some(q) => d.minimum + offset - offset.rem_euclid(q as i64),
        None => {
            let step = d.step.max(1) as i64;
            d.minimum + ((offset + step / 2) / step) * step
        }
    };
    d.clamp(achieved)
}

impl DeviceTransport for MockDevice {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.state.lock().calls.open += 1;
        self.errors.check_operation(&self.device_id, "open")
    }

    fn query_control_directory(&mut self) -> Result<Vec<ControlDescriptor>, TransportError> {
        let mut state = self.state.lock();
        state.calls.query_control_directory += 1;
        self.errors
            .check_operation(&self.device_id, "query_control_directory")?;
        Ok(state
            .controls
            .iter()
            .map(|c| c.descriptor.simple())
            .collect())
    }

    fn query_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError> {
        let mut state = self.state.lock();
        state.calls.query_control += 1;
        self.errors.check_operation(&self.device_id, "query_control")?;
        state
            .find(id)
            .map(|c| c.descriptor.simple())
            .ok_or_else(|| self.unknown(id))
    }

    fn query_ext_control(&mut self, id: ControlId) -> Result<ControlDescriptor, TransportError> {
        let mut state = self.state.lock();
        state.calls.query_ext_control += 1;
        if !self.extended_queries {
            return Err(TransportError::new(
                &self.device_id,
                TransportErrorKind::Unsupported,
                "extended control queries not supported",
            ));
        }
        self.errors
            .check_operation(&self.device_id, "query_ext_control")?;
        state
            .find(id)
            .map(|c| c.descriptor.clone())
            .ok_or_else(|| self.unknown(id))
    }

    fn get_control(&mut self, id: ControlId) -> Result<ControlValue, TransportError> {
        let mut state = self.state.lock();
        state.calls.get_control += 1;
        self.errors.check_operation(&self.device_id, "get_control")?;
        state
            .find(id)
            .map(|c| c.value.clone())
            .ok_or_else(|| self.unknown(id))
    }

    fn set_control(
        &mut self,
        id: ControlId,
        value: &ControlValue,
    ) -> Result<ControlValue, TransportError> {
        let mut state = self.state.lock();
        state.calls.set_control += 1;
        self.errors.check_operation(&self.device_id, "set_control")?;
        if matches!(value, ControlValue::Array(_) | ControlValue::String(_)) {
            self.errors.check_operation(&self.device_id, "set_ext_control")?;
        }
        let device_id = self.device_id.clone();
        let control = state.find_mut(id).ok_or_else(|| {
            TransportError::new(
                &device_id,
                TransportErrorKind::UnknownControl,
                format!("no control with id 0x{id:08x}"),
            )
        })?;

        let achieved = match (control.descriptor.control_type, value) {
            // Buttons hold no state.
            (ControlType::Button, _) => value.clone(),
            (_, ControlValue::Integer(v)) => {
                let q = quantise(control, i64::from(*v));
                ControlValue::Integer(i32::try_from(q).unwrap_or(*v))
            }
            (_, ControlValue::Integer64(v)) => ControlValue::Integer64(quantise(control, *v)),
            (_, ControlValue::Array(array)) => ControlValue::Array(ArrayValue::new(
                array.element_size,
                array
                    .elements
                    .iter()
                    .map(|&e| control.descriptor.clamp(e))
                    .collect(),
            )),
            _ => value.clone(),
        };
        if control.descriptor.control_type != ControlType::Button {
            control.value = achieved.clone();
        }
        state.set_log.push((id, achieved.clone()));
        Ok(achieved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    fn id_of(device: &MockDevice, name: &str) -> ControlId {
        device.descriptor(name).map(|d| d.id).unwrap_or_default()
    }

    #[test]
    fn test_set_counts_and_logs() {
        let mut device = MockDevice::image_sensor("mock0", 8);
        let gain = id_of(&device, GAIN);
        let achieved = device.set_control(gain, &ControlValue::Integer(42)).unwrap();
        assert_eq!(achieved, ControlValue::Integer(42));
        assert_eq!(device.calls().set_control, 1);
        assert_eq!(device.value_i64(GAIN), Some(42));
        assert_eq!(device.set_log(), vec![(gain, ControlValue::Integer(42))]);
    }

    #[test]
    fn test_step_rounding() {
        let device = MockDevice::new("mock0");
        device.add_control(
            ControlDescriptor::builder(1, "coarse", ControlType::Integer)
                .range(0, 100)
                .step(10)
                .build(),
            ControlValue::Integer(0),
        );
        let mut handle = device.clone();
        assert_eq!(
            handle.set_control(1, &ControlValue::Integer(44)).unwrap(),
            ControlValue::Integer(40)
        );
        assert_eq!(
            handle.set_control(1, &ControlValue::Integer(46)).unwrap(),
            ControlValue::Integer(50)
        );
    }

    #[test]
    fn test_quantum_floors() {
        let mut device = MockDevice::image_sensor("mock0", 8);
        device.set_quantum(V_RAMP, 4);
        let ramp = id_of(&device, V_RAMP);
        assert_eq!(
            device.set_control(ramp, &ControlValue::Integer(7)).unwrap(),
            ControlValue::Integer(4)
        );
    }

    #[test]
    fn test_directory_is_simple() {
        let mut device = MockDevice::image_sensor("mock0", 8);
        let dir = device.query_control_directory().unwrap();
        assert_eq!(dir.len(), 6);
        assert!(dir.iter().all(|d| d.extended.is_none()));

        let fpnc = id_of(&device, FPNC);
        let ext = device.query_ext_control(fpnc).unwrap();
        assert_eq!(ext.extended.map(|e| e.element_count), Some(8));
    }

    #[test]
    fn test_extended_queries_can_be_disabled() {
        let mut device = MockDevice::image_sensor("mock0", 8).without_extended_queries();
        let err = device.query_ext_control(1).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unsupported);
    }

    #[test]
    fn test_injected_set_failure() {
        let mut device = MockDevice::image_sensor("mock0", 8).with_errors(ErrorConfig::scenario(
            ErrorScenario::Timeout {
                operation: "set_control",
            },
        ));
        let gain = id_of(&device, GAIN);
        let err = device.set_control(gain, &ControlValue::Integer(1)).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        assert_eq!(device.value_i64(GAIN), Some(0));
    }

    #[test]
    fn test_array_writes_fail_separately() {
        let mut device = MockDevice::image_sensor("mock0", 2).with_errors(ErrorConfig::scenario(
            ErrorScenario::Timeout {
                operation: "set_ext_control",
            },
        ));
        let gain = id_of(&device, GAIN);
        let fpnc = id_of(&device, FPNC);
        assert!(device.set_control(gain, &ControlValue::Integer(3)).is_ok());
        let table = ControlValue::Array(ArrayValue::new(4, vec![1, 2]));
        let err = device.set_control(fpnc, &table).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Timeout);
        let untouched = ControlValue::Array(ArrayValue::new(4, vec![4096; 2]));
        assert_eq!(device.value(FPNC), Some(untouched));
    }
}
