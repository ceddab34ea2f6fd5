// ── Core error types ──
//
// `CoreError` is what engine operations return. `ResolutionMiss` is not an
// operational failure: resolvers hand it back when a field cannot be
// produced right now, and callers substitute a default.

use serde_json::Value;
use thiserror::Error;

use crate::resolver::ArgumentType;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The settings document for a location could not be parsed.
    #[error("Settings for '{location}' could not be parsed: {message}")]
    ConfigParse { location: String, message: String },

    /// The settings source could not be read or written.
    #[error("Settings source for '{location}' failed: {message}")]
    ConfigSource { location: String, message: String },

    #[error(transparent)]
    ArgumentType(#[from] ArgumentTypeError),

    #[error("Entity not found: {unique_id}")]
    EntityNotFound { unique_id: String },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Entity {unique_id} has no sub-capability slot '{slot}'")]
    SlotNotFound { unique_id: String, slot: String },

    /// The entity's descriptor declares no command for the requested key.
    #[error("Entity {unique_id} declares no command{}", key.as_deref().map(|k| format!(" for '{k}'")).unwrap_or_default())]
    CommandNotDeclared {
        unique_id: String,
        key: Option<String>,
    },

    #[error("Transport error: {message}")]
    Transport { message: String, transient: bool },

    #[error("Engine is not running")]
    EngineStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { transient: true, .. })
    }
}

impl From<capmesh_api::Error> for CoreError {
    fn from(err: capmesh_api::Error) -> Self {
        Self::Transport {
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }
}

// ── ArgumentTypeError ────────────────────────────────────────────────

/// An outbound command argument could not be converted to its declared type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value} to {expected}")]
pub struct ArgumentTypeError {
    pub value: Value,
    pub expected: ArgumentType,
}

// ── ResolutionMiss ───────────────────────────────────────────────────

/// A descriptor field could not be resolved against the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionMiss {
    #[error("no sub-capability slot named '{0}'")]
    UnknownSlot(String),

    #[error("field '{0}' is not declared")]
    MissingField(String),

    #[error("descriptor declares no attribute to read")]
    NoAttribute,

    #[error("no status for {component}/{capability}/{attribute}")]
    MissingAttribute {
        component: String,
        capability: String,
        attribute: String,
    },

    #[error("{component}/{capability}/{attribute} has no value")]
    NoValue {
        component: String,
        capability: String,
        attribute: String,
    },

    #[error("device is not known to the store")]
    UnknownDevice,
}
