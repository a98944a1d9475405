//! Mock hardware for sensor_tune.
//!
//! Simulated devices for testing the control pipeline without a camera.
//!
//! # Available Mocks
//!
//! - [`MockDevice`] - In-memory control table implementing `DeviceTransport`,
//!   with step rounding, call counters and fault injection
//! - [`MockSensor`] - Frame source whose brightness and column pattern follow
//!   the device's exposure, gain, ramp and correction controls
//!
//! Both share state through cheap clones, so a test can hand one clone of a
//! `MockDevice` to the mediator and keep another to inspect it:
//!
//! ```rust,ignore
//! use tune_driver_mock::{MockDevice, MockSensor, MockSensorConfig};
//!
//! let device = MockDevice::image_sensor("mock0", 64);
//! let sensor = MockSensor::new(MockSensorConfig::default(), device.clone(), clock);
//! let mediator = Mediator::new(Box::new(device.clone()), clock, Default::default());
//! assert_eq!(device.calls().set_control, 0);
//! ```

pub mod common;
mod mock_device;
mod mock_sensor;

pub use common::{ErrorConfig, ErrorScenario, MockRng};

pub use mock_device::{
    CallCounts, EXPOSURE, FPNC, GAIN, MockDevice, SENSOR_TEMPERATURE, TEST_PATTERN, V_RAMP,
};
pub use mock_sensor::{MockSensor, MockSensorConfig};
