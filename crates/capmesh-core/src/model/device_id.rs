// ── Device identity ──
//
// Vendor device ids are UUIDs in practice, but settings documents are
// hand-written and the engine must not reject anything else. `DeviceId`
// normalizes UUIDs (case, braces) and keeps everything else verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical identifier for a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Uuid(Uuid),
    Opaque(String),
}

impl DeviceId {
    pub fn is_uuid(&self) -> bool {
        matches!(self, Self::Uuid(_))
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Opaque(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<Uuid> for DeviceId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(s.trim()) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Opaque(s),
        }
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}
