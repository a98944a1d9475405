//! Fault injection for the mock device transport.
//!
//! Operations are identified by the transport method name (`"open"`,
//! `"query_control"`, `"set_control"`, ...). Array and string writes also
//! pass `"set_ext_control"` after `"set_control"`. `"*"` in a rate table
//! matches every operation.

use super::rng::MockRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tune_core::{TransportError, TransportErrorKind};

/// Fault injection configuration. Clones share counters and fault state.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Let `count` calls of `operation` succeed, fail every later one.
    FailAfterN {
        /// Transport method name.
        operation: &'static str,
        /// Calls that still succeed.
        count: u32,
    },
    /// Every call of `operation` times out.
    Timeout {
        /// Transport method name.
        operation: &'static str,
    },
    /// Every call of `operation` is refused as unsupported.
    Unsupported {
        /// Transport method name.
        operation: &'static str,
    },
    /// The first call of any operation loses the device for good.
    CommunicationLoss,
    /// The first call of any operation latches a hardware fault.
    HardwareFault {
        /// Fault code carried in the error message.
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// No injected failures.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures at `rate` with a fixed seed.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scripted failure.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scripted failures, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Per-operation failure rates.
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Decide whether `operation` on `device` fails.
    pub fn check_operation(
        &self,
        device: &str,
        operation: &'static str,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(TransportError::new(
                device,
                TransportErrorKind::Communication,
                "communication lost",
            ));
        }
        if state.hardware_fault_code != 0 {
            return Err(TransportError::new(
                device,
                TransportErrorKind::Hardware,
                format!("hardware fault: {}", state.hardware_fault_code),
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN { operation: op, count } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(TransportError::new(
                            device,
                            TransportErrorKind::Hardware,
                            format!("injected failure after {count} '{operation}' calls"),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(TransportError::new(
                        device,
                        TransportErrorKind::Timeout,
                        format!("'{operation}' timed out"),
                    ));
                }
                ErrorScenario::Unsupported { operation: op } if *op == operation => {
                    return Err(TransportError::new(
                        device,
                        TransportErrorKind::Unsupported,
                        format!("'{operation}' is not supported"),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(TransportError::new(
                        device,
                        TransportErrorKind::Communication,
                        "communication lost",
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(TransportError::new(
                        device,
                        TransportErrorKind::Hardware,
                        format!("hardware fault: {code}"),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);
        if self.rng.should_fail(rate) {
            return Err(TransportError::new(
                device,
                TransportErrorKind::Hardware,
                format!("random failure on '{operation}'"),
            ));
        }

        Ok(())
    }

    /// Clear counters and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}
