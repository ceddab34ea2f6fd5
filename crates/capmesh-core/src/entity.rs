// ── Entity runtime state ──
//
// One logical entity per (device, descriptor). Identifiers are rendered
// once at construction and never recomputed; the descriptor is captured by
// `Arc` so a settings reload cannot change it underneath a live entity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::Descriptor;
use crate::error::ResolutionMiss;
use crate::model::{CapabilityKey, Device, DeviceId, Platform};
use crate::resolver::{Resolver, StatusLookup, identifier_vars};
use crate::template::{self, UNIQUE_ID_FORMAT};

const SYNTAX_ATTRIBUTE: &str = "syntax";

// ── DeviceInfo ───────────────────────────────────────────────────────

/// Device-registry entry an entity attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hw_version: Option<String>,
    pub sw_version: Option<String>,
}

impl From<&Device> for DeviceInfo {
    fn from(device: &Device) -> Self {
        Self {
            identifiers: vec![device.id.to_string()],
            name: device.label.clone(),
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone().or_else(|| device.name.clone()),
            hw_version: device.hw_version.clone(),
            sw_version: device.sw_version.clone(),
        }
    }
}

// ── EntitySnapshot ───────────────────────────────────────────────────

/// What the host displays for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub state: Value,
    pub unit: Option<String>,
    pub available: bool,
    pub attributes: BTreeMap<String, Value>,
}

impl EntitySnapshot {
    pub fn unavailable() -> Self {
        Self {
            state: Value::Null,
            unit: None,
            available: false,
            attributes: BTreeMap::new(),
        }
    }
}

/// Knobs for [`EntityRuntime::compute_snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Expose the descriptor as written under a `syntax` attribute.
    pub syntax_property: bool,
}

// ── EntityRuntime ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EntityRuntime {
    unique_id: String,
    entity_id: String,
    name: String,
    platform: Platform,
    device_id: DeviceId,
    descriptor: Arc<Descriptor>,
    watched: BTreeSet<CapabilityKey>,
    device_info: DeviceInfo,
    last_synced: ArcSwapOption<DateTime<Utc>>,
}

impl EntityRuntime {
    /// Build the runtime state for `descriptor` on `device`.
    ///
    /// The address format is the descriptor's own `entity_id_format` when
    /// present, otherwise `default_format`.
    pub fn new(platform: Platform, device: &Device, descriptor: Arc<Descriptor>, default_format: &str) -> Self {
        let vars = identifier_vars(device, &descriptor);
        let unique_id = template::render(UNIQUE_ID_FORMAT, &vars);

        let format = descriptor.entity_id_format.as_deref().unwrap_or(default_format);
        let entity_id = template::entity_address(platform.as_ref(), &template::render(format, &vars), &unique_id);

        let name = match descriptor.name.as_deref() {
            Some(n) => template::render(n, &vars),
            None => format!(
                "{} {}",
                device.label,
                descriptor.attribute.as_deref().unwrap_or(&descriptor.capability)
            ),
        };

        Self {
            unique_id,
            entity_id,
            name,
            platform,
            device_id: device.id.clone(),
            watched: descriptor.watched_keys(),
            descriptor,
            device_info: DeviceInfo::from(device),
            last_synced: ArcSwapOption::empty(),
        }
    }

    /// Attach to another device-registry entry (`parent_entity_id`).
    #[must_use]
    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = info;
        self
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// `(component, capability)` pairs whose events affect this entity.
    pub fn watched(&self) -> &BTreeSet<CapabilityKey> {
        &self.watched
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced.load_full().map(|t| *t)
    }

    pub fn mark_synced(&self, at: DateTime<Utc>) {
        self.last_synced.store(Some(Arc::new(at)));
    }

    pub fn resolver<'a>(&'a self, device: &'a Device, lookup: &'a dyn StatusLookup) -> Resolver<'a> {
        Resolver::new(lookup, device, &self.descriptor)
    }

    /// Recompute the displayed state.
    ///
    /// A descriptor with a state fails on a state miss; everything else
    /// (unit, computed fields, slot states) is best-effort. Only
    /// non-literal fields become attributes.
    pub fn compute_snapshot(
        &self,
        device: &Device,
        lookup: &dyn StatusLookup,
        options: SnapshotOptions,
    ) -> Result<EntitySnapshot, ResolutionMiss> {
        let r = self.resolver(device, lookup);

        let state = if self.descriptor.has_state() {
            r.state(None)?
        } else {
            Value::Null
        };

        let unit = r
            .resolve(None, "unit")
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .or_else(|| r.status(None).and_then(|s| s.unit));

        let mut attributes = BTreeMap::new();
        for (field, value) in &self.descriptor.fields {
            if field == "state" || field == "unit" || value.is_literal() {
                continue;
            }
            if let Ok(v) = r.resolve(None, field) {
                attributes.insert(field.clone(), v);
            }
        }
        for slot in &self.descriptor.slots {
            let Some(name) = slot.slot.as_deref() else { continue };
            if slot.has_state() {
                if let Ok(v) = r.state(Some(name)) {
                    attributes.insert(name.to_owned(), v);
                }
            }
        }
        if options.syntax_property {
            attributes.insert(SYNTAX_ATTRIBUTE.to_owned(), self.descriptor.to_value());
        }

        Ok(EntitySnapshot {
            state,
            unit,
            available: true,
            attributes,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use capmesh_api::{DeviceStatus, Status};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::template::DEFAULT_ENTITY_ID_FORMAT;

    struct Tree(DeviceStatus);

    impl StatusLookup for Tree {
        fn status(&self, _: &DeviceId, c: &str, cap: &str, attr: &str) -> Option<Status> {
            self.0.get(c, cap, attr).cloned()
        }
    }

    fn device() -> Device {
        Device::new("d1", "Kitchen Plug")
            .with_type("ZIGBEE")
            .with_capability("main", "switch")
            .with_capability("main", "powerMeter")
    }

    fn descriptor(raw: &Value) -> Arc<Descriptor> {
        Arc::new(Descriptor::parse(raw).unwrap())
    }

    #[test]
    fn identifiers_are_rendered_once() {
        let d = descriptor(&json!({ "capability": "switch", "attribute": "switch", "command": { "on": "on", "off": "off" } }));
        let e = EntityRuntime::new(Platform::Switch, &device(), d, DEFAULT_ENTITY_ID_FORMAT);
        assert_eq!(e.unique_id(), "capmesh_d1_main_switch_switch_on_off_");
        assert_eq!(e.entity_id(), "switch.kitchen_plug_main_switch_switch_on_off");
        assert_eq!(e.name(), "Kitchen Plug switch");
        assert_eq!(e.device_info().identifiers, vec!["d1"]);
    }

    #[test]
    fn address_format_does_not_touch_unique_id() {
        let d = descriptor(&json!({ "capability": "switch", "attribute": "switch", "name": "%{label} power" }));
        let a = EntityRuntime::new(Platform::Switch, &device(), Arc::clone(&d), DEFAULT_ENTITY_ID_FORMAT);
        let b = EntityRuntime::new(Platform::Switch, &device(), d, "%{label}_%{name}");
        assert_eq!(a.unique_id(), b.unique_id());
        assert_ne!(a.entity_id(), b.entity_id());
        assert_eq!(b.name(), "Kitchen Plug power");

        let own = descriptor(&json!({ "capability": "switch", "entity_id_format": "plug_%{device_type}" }));
        let c = EntityRuntime::new(Platform::Switch, &device(), own, "ignored");
        assert_eq!(c.entity_id(), "switch.plug_zigbee");
    }

    #[test]
    fn snapshot_resolves_state_unit_and_attributes() {
        let status = DeviceStatus::from_payload(&json!({ "components": { "main": {
            "switch": { "switch": { "value": "on" } },
            "powerMeter": { "power": { "value": 12, "unit": "W" } }
        } } }))
        .unwrap();
        let d = descriptor(&json!({
            "capability": "powerMeter",
            "attribute": "power",
            "on_state": ["on"],
            "switch": { "capability": "switch", "attribute": "switch" },
            "capabilities": [ { "slot": "relay", "capability": "switch", "attribute": "switch" } ]
        }));
        let e = EntityRuntime::new(Platform::Sensor, &device(), d, DEFAULT_ENTITY_ID_FORMAT);

        let snap = e
            .compute_snapshot(&device(), &Tree(status), SnapshotOptions { syntax_property: true })
            .unwrap();
        assert_eq!(snap.state, json!(12));
        assert_eq!(snap.unit.as_deref(), Some("W"));
        assert!(snap.available);
        assert_eq!(snap.attributes.get("switch"), Some(&json!("on")));
        assert_eq!(snap.attributes.get("relay"), Some(&json!("on")));
        assert!(!snap.attributes.contains_key("on_state"));
        assert_eq!(snap.attributes["syntax"]["attribute"], json!("power"));
    }

    #[test]
    fn state_miss_fails_snapshot() {
        let d = descriptor(&json!({ "capability": "switch", "attribute": "switch" }));
        let e = EntityRuntime::new(Platform::Switch, &device(), d, DEFAULT_ENTITY_ID_FORMAT);
        let err = e
            .compute_snapshot(&device(), &Tree(DeviceStatus::default()), SnapshotOptions::default())
            .unwrap_err();
        assert!(matches!(err, ResolutionMiss::MissingAttribute { .. }));
    }

    #[test]
    fn stateless_descriptors_are_available() {
        let d = descriptor(&json!({ "capability": "switch", "command": "on" }));
        let e = EntityRuntime::new(Platform::Button, &device(), d, DEFAULT_ENTITY_ID_FORMAT);
        let snap = e
            .compute_snapshot(&device(), &Tree(DeviceStatus::default()), SnapshotOptions::default())
            .unwrap();
        assert!(snap.available);
        assert_eq!(snap.state, Value::Null);
        assert!(e.last_synced().is_none());
        e.mark_synced(Utc::now());
        assert!(e.last_synced().is_some());
    }
}
