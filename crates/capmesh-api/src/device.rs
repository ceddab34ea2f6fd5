// ── Device description payloads ──
//
// The shape a device listing arrives in: a device with an ordered list of
// components, each exposing an ordered list of capability references.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of the root component every device has.
pub const MAIN_COMPONENT: &str = "main";

/// A device as described by the vendor listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub device_id: String,

    /// Vendor-assigned name (model-ish).
    #[serde(default)]
    pub name: Option<String>,

    /// User-assigned label.
    #[serde(default)]
    pub label: Option<String>,

    /// Runtime device type, e.g. `"OCF"`, `"ZIGBEE"`, `"VIPER"`.
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,

    #[serde(default)]
    pub manufacturer_name: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub hardware_version: Option<String>,

    #[serde(default)]
    pub firmware_version: Option<String>,

    #[serde(default)]
    pub components: Vec<ComponentPayload>,
}

/// One sub-unit of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentPayload {
    pub id: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub capabilities: Vec<CapabilityRef>,
}

/// Reference to a capability exposed by a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub id: String,

    #[serde(default)]
    pub version: Option<u32>,
}

impl DevicePayload {
    /// Parse a single device from a JSON body.
    pub fn from_json(body: &str) -> Result<Self, Error> {
        serde_json::from_str(body).map_err(|e| Error::deserialization(&e, body))
    }

    /// Parse a `{ "items": [...] }` device listing.
    pub fn list_from_json(body: &str) -> Result<Vec<Self>, Error> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            items: Vec<DevicePayload>,
        }

        serde_json::from_str::<Listing>(body)
            .map(|l| l.items)
            .map_err(|e| Error::deserialization(&e, body))
    }

    /// Iterate `(component, capability)` pairs in payload order.
    pub fn capability_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.components.iter().flat_map(|c| {
            c.capabilities
                .iter()
                .map(move |cap| (c.id.as_str(), cap.id.as_str()))
        })
    }
}
