// ── Parsed, immutable settings ──
//
// A `SettingsSnapshot` is built once from a document and never mutated.
// Reloading builds a new snapshot and swaps it in whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::descriptor::Descriptor;
use crate::model::{CapabilityKey, Device, DeviceId, PLATFORMS, Platform};
use crate::template::DEFAULT_ENTITY_ID_FORMAT;

use super::document::SettingsDocument;

type PlatformDescriptors = BTreeMap<Platform, Vec<Arc<Descriptor>>>;

/// Descriptors declared for one specific device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub device_id: DeviceId,
    pub device_type: Option<String>,
    pub platforms: PlatformDescriptors,
}

impl DeviceSettings {
    fn applies_to(&self, device: &Device) -> bool {
        self.device_type.as_deref().is_none_or(|t| device.matches_type(t))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    location: String,
    loaded: bool,
    globals: PlatformDescriptors,
    devices: Vec<DeviceSettings>,
    ignore_capabilities: BTreeSet<String>,
    ignore_devices: BTreeSet<DeviceId>,
    ignore_platforms: BTreeSet<Platform>,
    default_entity_id_format: String,
    subscribe_capabilities: Vec<String>,
}

impl SettingsSnapshot {
    /// The "unset" snapshot: every query answers empty or false.
    pub fn unset(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            loaded: false,
            globals: BTreeMap::new(),
            devices: Vec::new(),
            ignore_capabilities: BTreeSet::new(),
            ignore_devices: BTreeSet::new(),
            ignore_platforms: BTreeSet::new(),
            default_entity_id_format: DEFAULT_ENTITY_ID_FORMAT.to_owned(),
            subscribe_capabilities: Vec::new(),
        }
    }

    pub fn from_document(location: impl Into<String>, doc: &SettingsDocument) -> Self {
        let location = location.into();

        let ignore_platforms = doc
            .ignore_platforms
            .iter()
            .filter_map(|name| {
                let parsed = name.parse::<Platform>().ok();
                if parsed.is_none() {
                    warn!(location = %location, platform = %name, "unknown platform in ignore_platforms");
                }
                parsed
            })
            .collect();

        let globals = parse_platforms(&location, "globals", &doc.globals.platforms);

        let devices = doc
            .devices
            .iter()
            .map(|section| {
                let device_id = DeviceId::from(section.device_id.as_str());
                if !device_id.is_uuid() {
                    warn!(location = %location, device_id = %section.device_id, "device id is not a UUID");
                }
                let context = format!("devices[{}]", section.device_id);
                DeviceSettings {
                    device_id,
                    device_type: section.device_type.clone(),
                    platforms: parse_platforms(&location, &context, &section.platforms),
                }
            })
            .collect();

        Self {
            loaded: true,
            globals,
            devices,
            ignore_capabilities: doc.globals.ignore_capabilities.iter().cloned().collect(),
            ignore_devices: doc
                .globals
                .ignore_devices
                .iter()
                .map(|id| DeviceId::from(id.as_str()))
                .collect(),
            ignore_platforms,
            default_entity_id_format: doc
                .default_entity_id_format
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ENTITY_ID_FORMAT.to_owned()),
            subscribe_capabilities: doc.subscribe_capabilities.clone(),
            location,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether this snapshot came from a successfully parsed document.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // ── Platforms ────────────────────────────────────────────────────

    /// Platform universe minus ignored platforms, in priority order.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        if !self.loaded {
            return Vec::new();
        }
        PLATFORMS
            .iter()
            .copied()
            .filter(|p| !self.ignore_platforms.contains(p))
            .collect()
    }

    pub fn allow_platform(&self, platform: Platform) -> bool {
        self.loaded && !self.ignore_platforms.contains(&platform)
    }

    pub fn ignore_platforms(&self) -> &BTreeSet<Platform> {
        &self.ignore_platforms
    }

    // ── Capabilities and devices ─────────────────────────────────────

    pub fn ignore_capabilities(&self) -> &BTreeSet<String> {
        &self.ignore_capabilities
    }

    pub fn ignore_devices(&self) -> &BTreeSet<DeviceId> {
        &self.ignore_devices
    }

    pub fn subscribe_capabilities(&self) -> &[String] {
        &self.subscribe_capabilities
    }

    pub fn default_entity_id_format(&self) -> &str {
        &self.default_entity_id_format
    }

    /// Not explicitly ignored.
    pub fn allow_device(&self, device_id: &DeviceId) -> bool {
        !self.ignore_devices.contains(device_id)
    }

    pub fn has_device_settings(&self, device_id: &DeviceId) -> bool {
        self.devices.iter().any(|d| &d.device_id == device_id)
    }

    /// Eligible for global descriptors: allowed and not listed in `devices`.
    pub fn allow_device_custom(&self, device_id: &DeviceId) -> bool {
        self.allow_device(device_id) && !self.has_device_settings(device_id)
    }

    pub fn global_descriptors(&self, platform: Platform) -> &[Arc<Descriptor>] {
        self.globals.get(&platform).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn device_settings(&self) -> &[DeviceSettings] {
        &self.devices
    }

    /// Every capability named by any descriptor or slot, across globals
    /// and devices.
    pub fn capabilities(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for descriptors in self.globals.values().chain(self.devices.iter().flat_map(|d| d.platforms.values())) {
            collect_capabilities(descriptors, &mut names);
        }
        names
    }

    pub fn capabilities_for(&self, platform: Platform) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_capabilities(self.global_descriptors(platform), &mut names);
        for device in &self.devices {
            if let Some(descriptors) = device.platforms.get(&platform) {
                collect_capabilities(descriptors, &mut names);
            }
        }
        names
    }

    // ── Descriptor selection ─────────────────────────────────────────

    /// Descriptors of `platform` that apply to `devices`.
    ///
    /// Global descriptors come first (descriptor order, then device order),
    /// restricted to devices eligible for globals. Device-specific
    /// descriptors follow, restricted to devices whose type filter matches.
    /// In both cases the device must expose the descriptor's
    /// `(component, capability)`.
    pub fn capability_settings_for(
        &self,
        platform: Platform,
        devices: &[Arc<Device>],
    ) -> Vec<(Arc<Device>, Arc<Descriptor>)> {
        let mut out = Vec::new();
        if !self.allow_platform(platform) {
            return out;
        }

        for descriptor in self.global_descriptors(platform) {
            for device in devices {
                if self.allow_device_custom(&device.id)
                    && device.has_capability(&descriptor.component, &descriptor.capability)
                {
                    out.push((Arc::clone(device), Arc::clone(descriptor)));
                }
            }
        }

        for settings in &self.devices {
            let Some(descriptors) = settings.platforms.get(&platform) else {
                continue;
            };
            let Some(device) = devices.iter().find(|d| d.id == settings.device_id) else {
                debug!(device_id = %settings.device_id, "configured device is not present");
                continue;
            };
            if !self.allow_device(&device.id) {
                continue;
            }
            if !settings.applies_to(device) {
                debug!(
                    device_id = %device.id,
                    declared = settings.device_type.as_deref().unwrap_or_default(),
                    actual = device.device_type.as_deref().unwrap_or_default(),
                    "device type does not match, skipping device settings"
                );
                continue;
            }
            for descriptor in descriptors {
                if device.has_capability(&descriptor.component, &descriptor.capability) {
                    out.push((Arc::clone(device), Arc::clone(descriptor)));
                } else {
                    debug!(
                        device_id = %device.id,
                        key = %descriptor.key(),
                        "device does not expose configured capability"
                    );
                }
            }
        }

        out
    }

    /// The `(component, capability)` pairs `platform` declares for one
    /// device. Backs the settings-driven allocation predicate.
    pub fn declared_keys(&self, platform: Platform, device: &Arc<Device>) -> BTreeSet<CapabilityKey> {
        self.capability_settings_for(platform, std::slice::from_ref(device))
            .into_iter()
            .map(|(_, d)| d.key())
            .collect()
    }
}

fn collect_capabilities(descriptors: &[Arc<Descriptor>], names: &mut BTreeSet<String>) {
    for descriptor in descriptors {
        names.insert(descriptor.capability.clone());
        for slot in &descriptor.slots {
            names.insert(slot.capability.clone());
        }
    }
}

fn parse_platforms(location: &str, context: &str, sections: &BTreeMap<String, Value>) -> PlatformDescriptors {
    let mut out = PlatformDescriptors::new();
    for (name, raw) in sections {
        let Ok(platform) = name.parse::<Platform>() else {
            warn!(location, context, key = %name, "unknown platform section, skipping");
            continue;
        };
        let entries = match raw {
            Value::Array(entries) => entries.as_slice(),
            Value::Null => &[][..],
            _ => {
                warn!(location, context, platform = %platform, "platform section is not a list, skipping");
                continue;
            }
        };
        let descriptors = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match Descriptor::parse(entry) {
                Ok(d) => Some(Arc::new(d)),
                Err(e) => {
                    warn!(location, context, platform = %platform, index, error = %e, "skipping malformed descriptor");
                    None
                }
            })
            .collect();
        out.insert(platform, descriptors);
    }
    out
}
