// ── Settings document (wire shape) ──
//
// Direct serde mirror of the YAML file. Platform sections are kept as raw
// JSON values here; descriptors are parsed one by one when the snapshot is
// built so a single bad entry cannot sink the whole document.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Written when a location has no settings document yet.
pub const SKELETON: &str = r#"# capmesh entity settings
#
# globals:    descriptors applied to every device, keyed by platform
# devices:    per-device descriptors; a listed device ignores all globals
globals:
  ignore_capabilities: []
  ignore_devices: []

devices: []

ignore_platforms: []

default_entity_id_format: "%{label}_%{component}_%{capability}_%{attribute}_%{command}_%{name}"
"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(default, deserialize_with = "nullable")]
    pub globals: GlobalSection,

    #[serde(default, deserialize_with = "nullable")]
    pub devices: Vec<DeviceSection>,

    #[serde(default, deserialize_with = "nullable")]
    pub ignore_platforms: Vec<String>,

    #[serde(default)]
    pub default_entity_id_format: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub subscribe_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSection {
    #[serde(default, deserialize_with = "nullable")]
    pub ignore_capabilities: Vec<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub ignore_devices: Vec<String>,

    /// platform name -> descriptor list
    #[serde(flatten)]
    pub platforms: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    pub device_id: String,

    /// Optional runtime type filter, compared case-insensitively.
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,

    #[serde(flatten)]
    pub platforms: BTreeMap<String, Value>,
}

impl SettingsDocument {
    /// Parse YAML text. Blank text is an empty document.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

/// Treat an explicit YAML `null` (`devices:` with nothing after it) like an
/// absent key.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
