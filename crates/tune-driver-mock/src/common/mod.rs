//! Shared infrastructure for the mock transport and sensor.
//!
//! - **errors**: fault injection
//! - **rng**: seeded random source

pub mod errors;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::MockRng;
