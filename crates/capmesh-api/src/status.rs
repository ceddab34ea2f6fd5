// ── Device status tree ──
//
// component -> capability -> attribute -> Status. A full status payload
// replaces the tree; push events patch single attributes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// A single attribute reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub data: Option<Value>,
}

impl Status {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            unit: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

type AttributeMap = BTreeMap<String, Status>;
type CapabilityMap = BTreeMap<String, AttributeMap>;

/// The live status of every attribute a device reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    components: BTreeMap<String, CapabilityMap>,
}

impl DeviceStatus {
    /// Build a status tree from a `{ "components": { ... } }` payload.
    pub fn from_payload(payload: &Value) -> Result<Self, Error> {
        let mut status = Self::default();
        status.apply_data(payload)?;
        Ok(status)
    }

    /// Replace the whole tree with the contents of a status payload.
    pub fn apply_data(&mut self, payload: &Value) -> Result<(), Error> {
        let components = payload
            .get("components")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::MalformedPayload("missing `components` object".into()))?;

        let mut tree = BTreeMap::new();
        for (component_id, capabilities) in components {
            let Some(capabilities) = capabilities.as_object() else {
                tracing::debug!(component = %component_id, "skipping non-object component status");
                continue;
            };
            let mut capability_map = CapabilityMap::new();
            for (capability, attributes) in capabilities {
                let Some(attributes) = attributes.as_object() else {
                    continue;
                };
                let attribute_map: AttributeMap = attributes
                    .iter()
                    .filter_map(|(name, raw)| {
                        serde_json::from_value::<Status>(raw.clone())
                            .ok()
                            .map(|s| (name.clone(), s))
                    })
                    .collect();
                capability_map.insert(capability.clone(), attribute_map);
            }
            tree.insert(component_id.clone(), capability_map);
        }

        self.components = tree;
        Ok(())
    }

    /// Patch one attribute. When the update carries no unit, the previously
    /// known unit is kept.
    pub fn apply_attribute_update(
        &mut self,
        component: &str,
        capability: &str,
        attribute: &str,
        value: Value,
        unit: Option<String>,
        data: Option<Value>,
    ) {
        let attributes = self
            .components
            .entry(component.to_owned())
            .or_default()
            .entry(capability.to_owned())
            .or_default();
        let unit = unit.or_else(|| attributes.get(attribute).and_then(|s| s.unit.clone()));
        attributes.insert(attribute.to_owned(), Status { value, unit, data });
    }

    /// Look up one attribute reading.
    pub fn get(&self, component: &str, capability: &str, attribute: &str) -> Option<&Status> {
        self.components
            .get(component)?
            .get(capability)?
            .get(attribute)
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.components.contains_key(component)
    }

    pub fn has_capability(&self, component: &str, capability: &str) -> bool {
        self.components
            .get(component)
            .is_some_and(|c| c.contains_key(capability))
    }

    /// Find an attribute by name on a component without knowing which
    /// capability carries it. Returns the first match in capability order.
    pub fn find_attribute(&self, component: &str, attribute: &str) -> Option<&Status> {
        self.components
            .get(component)?
            .values()
            .find_map(|attrs| attrs.get(attribute))
    }
}
