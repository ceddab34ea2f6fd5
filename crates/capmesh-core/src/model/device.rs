// ── Device domain type ──
//
// The engine's view of a device: identity, a few descriptive fields, and an
// index of which capabilities each component exposes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use capmesh_api::DevicePayload;

use super::DeviceId;

// ── CapabilityKey ────────────────────────────────────────────────────

/// A `(component, capability)` pair. The unit of allocation and routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityKey {
    pub component: String,
    pub capability: String,
}

impl CapabilityKey {
    pub fn new(component: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            capability: capability.into(),
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.capability)
    }
}

// ── CapabilityIndex ──────────────────────────────────────────────────

/// component -> set of capabilities it exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityIndex(BTreeMap<String, BTreeSet<String>>);

impl CapabilityIndex {
    pub fn insert(&mut self, component: impl Into<String>, capability: impl Into<String>) {
        self.0
            .entry(component.into())
            .or_default()
            .insert(capability.into());
    }

    pub fn contains(&self, component: &str, capability: &str) -> bool {
        self.0.get(component).is_some_and(|c| c.contains(capability))
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.0.contains_key(component)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every pair, ordered by component then capability.
    pub fn keys(&self) -> BTreeSet<CapabilityKey> {
        self.0
            .iter()
            .flat_map(|(component, caps)| caps.iter().map(move |cap| CapabilityKey::new(component, cap)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Into<String>, K: Into<String>> FromIterator<(C, K)> for CapabilityIndex {
    fn from_iter<I: IntoIterator<Item = (C, K)>>(iter: I) -> Self {
        let mut index = Self::default();
        for (component, capability) in iter {
            index.insert(component, capability);
        }
        index
    }
}

// ── Device ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub label: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hw_version: Option<String>,
    pub sw_version: Option<String>,
    pub capabilities: CapabilityIndex,
}

impl Device {
    /// A bare device, mostly useful for embedding and tests.
    pub fn new(id: impl Into<DeviceId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            name: None,
            device_type: None,
            manufacturer: None,
            model: None,
            hw_version: None,
            sw_version: None,
            capabilities: CapabilityIndex::default(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, component: &str, capability: &str) -> Self {
        self.capabilities.insert(component, capability);
        self
    }

    #[must_use]
    pub fn with_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn has_capability(&self, component: &str, capability: &str) -> bool {
        self.capabilities.contains(component, capability)
    }

    /// Case-insensitive comparison against a declared device type.
    pub fn matches_type(&self, declared: &str) -> bool {
        self.device_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(declared))
    }
}

impl From<&DevicePayload> for Device {
    fn from(payload: &DevicePayload) -> Self {
        let label = payload
            .label
            .clone()
            .or_else(|| payload.name.clone())
            .unwrap_or_else(|| payload.device_id.clone());

        Self {
            id: DeviceId::from(payload.device_id.as_str()),
            label,
            name: payload.name.clone(),
            device_type: payload.device_type.clone(),
            manufacturer: payload.manufacturer_name.clone(),
            model: payload.model.clone(),
            hw_version: payload.hardware_version.clone(),
            sw_version: payload.firmware_version.clone(),
            capabilities: payload.capability_pairs().collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn from_payload_builds_capability_index() {
        let payload = DevicePayload::from_json(
            r#"{
                "deviceId": "d1",
                "name": "Plug",
                "type": "ZIGBEE",
                "components": [
                    { "id": "main", "capabilities": [ { "id": "switch" }, { "id": "powerMeter" } ] },
                    { "id": "outlet2", "capabilities": [ { "id": "switch" } ] }
                ]
            }"#,
        )
        .unwrap();

        let device = Device::from(&payload);
        assert_eq!(device.label, "Plug");
        assert!(device.has_capability("main", "powerMeter"));
        assert!(device.has_capability("outlet2", "switch"));
        assert!(!device.has_capability("outlet2", "powerMeter"));
        assert_eq!(device.capabilities.len(), 3);
        assert!(device.matches_type("zigbee"));
        assert!(!device.matches_type("OCF"));
    }

    #[test]
    fn keys_are_ordered() {
        let device = Device::new("d1", "x")
            .with_capability("main", "switch")
            .with_capability("main", "battery")
            .with_capability("aux", "switch");
        let keys: Vec<String> = device.capabilities.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["aux/switch", "main/battery", "main/switch"]);
    }
}
