//! Name to id cache of a device's controls.

use std::collections::HashMap;
use tune_core::{ControlDescriptor, ControlId, DeviceTransport, TransportError};

/// Controls reported by one device, queried once per stream start.
///
/// Names are matched ASCII case-insensitively. Disabled controls are kept so
/// that a request naming one is rejected as disabled rather than unknown, but
/// [`ControlDirectory::list`] never surfaces them.
#[derive(Debug, Clone, Default)]
pub struct ControlDirectory {
    controls: Vec<ControlDescriptor>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<ControlId, usize>,
}

impl ControlDirectory {
    /// Directory over an already queried list.
    pub fn new(controls: Vec<ControlDescriptor>) -> Self {
        let mut by_name = HashMap::with_capacity(controls.len());
        let mut by_id = HashMap::with_capacity(controls.len());
        for (idx, control) in controls.iter().enumerate() {
            // First entry wins on duplicate names.
            by_name.entry(control.name.to_ascii_lowercase()).or_insert(idx);
            by_id.insert(control.id, idx);
        }
        Self {
            controls,
            by_name,
            by_id,
        }
    }

    /// Query the device's control list.
    pub fn discover<T: DeviceTransport + ?Sized>(
        transport: &mut T,
    ) -> Result<Self, TransportError> {
        let controls = transport.query_control_directory()?;
        tracing::debug!(
            device = transport.device_id(),
            count = controls.len(),
            "control directory queried"
        );
        Ok(Self::new(controls))
    }

    /// Id of the control called `name`.
    pub fn resolve(&self, name: &str) -> Option<ControlId> {
        self.lookup(name).map(|c| c.id)
    }

    /// Descriptor of the control called `name`.
    pub fn lookup(&self, name: &str) -> Option<&ControlDescriptor> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.controls[idx])
    }

    /// Descriptor by id.
    pub fn get(&self, id: ControlId) -> Option<&ControlDescriptor> {
        self.by_id.get(&id).map(|&idx| &self.controls[idx])
    }

    /// Enabled controls in device order.
    pub fn list(&self) -> impl Iterator<Item = &ControlDescriptor> {
        self.controls.iter().filter(|c| !c.is_disabled())
    }

    /// Number of controls the device reported, disabled ones included.
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// True when the device reported no controls.
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tune_core::{ControlFlags, ControlType};

    fn directory() -> ControlDirectory {
        ControlDirectory::new(vec![
            ControlDescriptor::builder(1, "Exposure Time, Absolute", ControlType::Integer)
                .range(1, 100)
                .build(),
            ControlDescriptor::builder(2, "Gain", ControlType::Integer)
                .range(0, 10)
                .flags(ControlFlags::DISABLED)
                .build(),
        ])
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let dir = directory();
        assert_eq!(dir.resolve("exposure time, absolute"), Some(1));
        assert_eq!(dir.resolve("EXPOSURE TIME, ABSOLUTE"), Some(1));
        assert_eq!(dir.resolve("missing"), None);
    }

    #[test]
    fn test_disabled_controls_not_listed() {
        let dir = directory();
        let names: Vec<_> = dir.list().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Exposure Time, Absolute"]);
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.resolve("gain"), Some(2));
    }
}
