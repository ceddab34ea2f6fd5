//! Capability descriptors: the per-entity mapping declared in settings.
//!
//! A descriptor names the capability it binds to, how to read its state and
//! how to command it. Composite descriptors carry named sub-capability
//! *slots* under `capabilities:`; each slot is itself a descriptor that
//! inherits the parent's component and capability unless it overrides them.

pub mod value;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use thiserror::Error;

use capmesh_api::MAIN_COMPONENT;

use crate::error::ResolutionMiss;
use crate::model::CapabilityKey;
use crate::resolver::ArgumentType;

pub use value::{AttributeRef, FieldValue, TableSource};

/// Keys with dedicated meaning. Everything else is a free-form field.
const RESERVED_KEYS: [&str; 10] = [
    "component",
    "capability",
    "attribute",
    "command",
    "name",
    "argument",
    "parent_entity_id",
    "entity_id_format",
    "capabilities",
    "slot",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor is not a mapping")]
    NotAMapping,

    #[error("descriptor has no capability")]
    MissingCapability,

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("sub-capability entry has no slot name")]
    MissingSlotName,

    #[error("slot '{0}' is declared twice")]
    DuplicateSlot(String),
}

fn invalid(field: &str, reason: impl Into<String>) -> DescriptorError {
    DescriptorError::InvalidField {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

// ── CommandSpec ──────────────────────────────────────────────────────

/// The command a descriptor sends: one command, or one per semantic key
/// (e.g. `{ on: "on", off: "off" }`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Single(String),
    Keyed(Vec<(String, String)>),
}

impl CommandSpec {
    fn parse(raw: &Value) -> Result<Self, DescriptorError> {
        match raw {
            Value::String(c) => Ok(Self::Single(c.clone())),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|c| (k.clone(), c.to_owned()))
                        .ok_or_else(|| invalid("command", format!("value for '{k}' is not a string")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Keyed),
            _ => Err(invalid("command", "expected a string or a mapping")),
        }
    }

    /// The command for `key`. A single command answers every key.
    pub fn select(&self, key: Option<&str>) -> Option<&str> {
        match self {
            Self::Single(c) => Some(c),
            Self::Keyed(pairs) => {
                let key = key?;
                pairs.iter().find(|(k, _)| k == key).map(|(_, c)| c.as_str())
            }
        }
    }

    /// Stable text used in identifiers.
    pub fn identity(&self) -> String {
        match self {
            Self::Single(c) => c.clone(),
            Self::Keyed(pairs) => pairs
                .iter()
                .map(|(_, c)| c.as_str())
                .collect::<Vec<_>>()
                .join("_"),
        }
    }
}

// ── ArgumentSpec ─────────────────────────────────────────────────────

/// Declared command arguments.
///
/// Accepted shapes: a list (`[a, b]`), a scalar, a per-key mapping
/// (`{ on: [..], off: [..] }`), or a typed form `{ type: int, value: .. }`
/// which may also carry per-key entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSpec {
    pub arg_type: Option<ArgumentType>,
    pub default: Option<Vec<Value>>,
    pub keyed: Vec<(String, Vec<Value>)>,
}

impl ArgumentSpec {
    fn parse(raw: &Value) -> Result<Self, DescriptorError> {
        let Value::Object(map) = raw else {
            return Ok(Self {
                default: Some(as_list(raw)),
                ..Self::default()
            });
        };

        let arg_type = match map.get("type") {
            None => None,
            Some(Value::String(t)) => Some(
                t.parse::<ArgumentType>()
                    .map_err(|_| invalid("argument", format!("unknown type '{t}'")))?,
            ),
            Some(_) => return Err(invalid("argument", "type must be a string")),
        };
        let default = map.get("value").map(as_list);
        let keyed = map
            .iter()
            .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "value")
            .map(|(k, v)| (k.clone(), as_list(v)))
            .collect();

        Ok(Self {
            arg_type,
            default,
            keyed,
        })
    }

    /// Arguments for `key`, falling back to the unkeyed default.
    pub fn select(&self, key: Option<&str>) -> Vec<Value> {
        key.and_then(|k| self.keyed.iter().find(|(kk, _)| kk == k))
            .map(|(_, v)| v.clone())
            .or_else(|| self.default.clone())
            .unwrap_or_default()
    }
}

fn as_list(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

// ── Descriptor ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub component: String,
    pub capability: String,
    pub attribute: Option<String>,
    pub command: Option<CommandSpec>,
    pub name: Option<String>,
    pub argument: Option<ArgumentSpec>,
    pub parent_entity_id: Option<String>,
    pub entity_id_format: Option<String>,
    /// Slot name when this descriptor is a sub-capability.
    pub slot: Option<String>,
    pub slots: Vec<Descriptor>,
    pub fields: BTreeMap<String, FieldValue>,
    raw: Map<String, Value>,
}

impl Descriptor {
    /// Parse a top-level descriptor. The component defaults to `main`.
    pub fn parse(raw: &Value) -> Result<Self, DescriptorError> {
        Self::parse_entry(raw, None)
    }

    fn parse_entry(raw: &Value, parent: Option<&Self>) -> Result<Self, DescriptorError> {
        let map = raw.as_object().ok_or(DescriptorError::NotAMapping)?;

        let component = text(map, "component")?
            .or_else(|| parent.map(|p| p.component.clone()))
            .unwrap_or_else(|| MAIN_COMPONENT.to_owned());
        let capability = text(map, "capability")?
            .or_else(|| parent.map(|p| p.capability.clone()))
            .ok_or(DescriptorError::MissingCapability)?;

        let fields = map
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), FieldValue::parse(v)))
            .collect();

        let mut descriptor = Self {
            component,
            capability,
            attribute: text(map, "attribute")?,
            command: map.get("command").map(CommandSpec::parse).transpose()?,
            name: text(map, "name")?,
            argument: map.get("argument").map(ArgumentSpec::parse).transpose()?,
            parent_entity_id: text(map, "parent_entity_id")?,
            entity_id_format: text(map, "entity_id_format")?,
            slot: text(map, "slot")?,
            slots: Vec::new(),
            fields,
            raw: map.clone(),
        };

        if let Some(subs) = map.get("capabilities") {
            if parent.is_some() {
                return Err(invalid("capabilities", "slots cannot nest"));
            }
            let subs = subs
                .as_array()
                .ok_or_else(|| invalid("capabilities", "expected a list"))?;
            let mut seen = BTreeSet::new();
            for sub in subs {
                let slot = Self::parse_entry(sub, Some(&descriptor))?;
                let name = slot.slot.clone().ok_or(DescriptorError::MissingSlotName)?;
                if !seen.insert(name.clone()) {
                    return Err(DescriptorError::DuplicateSlot(name));
                }
                descriptor.slots.push(slot);
            }
        }

        Ok(descriptor)
    }

    /// The `(component, capability)` this descriptor claims.
    pub fn key(&self) -> CapabilityKey {
        CapabilityKey::new(&self.component, &self.capability)
    }

    pub fn slot(&self, name: &str) -> Option<&Self> {
        self.slots.iter().find(|s| s.slot.as_deref() == Some(name))
    }

    /// `self` for `None`, otherwise the named slot.
    pub fn binding(&self, slot: Option<&str>) -> Result<&Self, ResolutionMiss> {
        match slot {
            None => Ok(self),
            Some(name) => self
                .slot(name)
                .ok_or_else(|| ResolutionMiss::UnknownSlot(name.to_owned())),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// A field exactly as written in settings.
    pub fn raw_field(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// The whole descriptor as written in settings.
    pub fn to_value(&self) -> Value {
        Value::Object(self.raw.clone())
    }

    /// Whether this descriptor exposes a state at all.
    pub fn has_state(&self) -> bool {
        self.attribute.is_some() || self.fields.contains_key("state")
    }

    pub fn command_identity(&self) -> Option<String> {
        self.command.as_ref().map(CommandSpec::identity)
    }

    /// Every `(component, capability)` whose changes can affect what this
    /// descriptor resolves to: its own, each slot's, and every indirect or
    /// template reference.
    pub fn watched_keys(&self) -> BTreeSet<CapabilityKey> {
        let mut keys = BTreeSet::new();
        self.collect_watched(&mut keys);
        for slot in &self.slots {
            slot.collect_watched(&mut keys);
        }
        keys
    }

    fn collect_watched(&self, keys: &mut BTreeSet<CapabilityKey>) {
        keys.insert(self.key());
        for value in self.fields.values() {
            value.collect_keys(&self.component, &self.capability, keys);
        }
    }
}

fn text(map: &Map<String, Value>, field: &str) -> Result<Option<String>, DescriptorError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}
