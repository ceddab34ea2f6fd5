// ── Descriptor field values ──
//
// A field in a capability descriptor is either a plain literal or one of
// three marked object shapes:
//
//   { attribute: x [, capability: y] [, component: z] [, command: c] }
//                                                          live attribute read
//   { template: "..." }                                    rendered expression
//   { mapping: <table | field name>, key: <field value> }  table lookup
//
// Anything else, including objects carrying extra keys, is a literal.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::model::CapabilityKey;
use crate::resolver::MappingTable;
use crate::template;

// `command` may sit beside a reference that also names the command it
// feeds; it does not change what is read.
const INDIRECT_KEYS: [&str; 4] = ["component", "capability", "attribute", "command"];

/// Reference to a live attribute. Missing parts default to the owning
/// descriptor's component and capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub component: Option<String>,
    pub capability: Option<String>,
    pub attribute: String,
}

impl AttributeRef {
    /// Parse a template path: `capability/attribute` or
    /// `component/capability/attribute`. Single names are template
    /// variables, not paths.
    pub fn from_path(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('/').map(str::trim).collect();
        match parts.as_slice() {
            [capability, attribute] if !capability.is_empty() && !attribute.is_empty() => Some(Self {
                component: None,
                capability: Some((*capability).to_owned()),
                attribute: (*attribute).to_owned(),
            }),
            [component, capability, attribute]
                if !component.is_empty() && !capability.is_empty() && !attribute.is_empty() =>
            {
                Some(Self {
                    component: Some((*component).to_owned()),
                    capability: Some((*capability).to_owned()),
                    attribute: (*attribute).to_owned(),
                })
            }
            _ => None,
        }
    }

    /// Fully qualified `(component, capability, attribute)` relative to an
    /// owning descriptor.
    pub fn qualify<'a>(&'a self, component: &'a str, capability: &'a str) -> (&'a str, &'a str, &'a str) {
        (
            self.component.as_deref().unwrap_or(component),
            self.capability.as_deref().unwrap_or(capability),
            &self.attribute,
        )
    }
}

/// Where a mapping lookup finds its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    Inline(MappingTable),
    /// Name of a sibling field holding the table.
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Literal(Value),
    Indirect(AttributeRef),
    Template(String),
    Mapped {
        table: TableSource,
        key: Box<FieldValue>,
    },
}

impl FieldValue {
    pub fn parse(raw: &Value) -> Self {
        let Value::Object(map) = raw else {
            return Self::Literal(raw.clone());
        };
        parse_template(map)
            .or_else(|| parse_mapped(map))
            .or_else(|| parse_indirect(map))
            .unwrap_or_else(|| Self::Literal(raw.clone()))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Every `(component, capability)` pair this value reads, qualified
    /// against the owning descriptor.
    pub fn collect_keys(&self, component: &str, capability: &str, out: &mut BTreeSet<CapabilityKey>) {
        match self {
            Self::Literal(_) => {}
            Self::Indirect(r) => {
                let (c, cap, _) = r.qualify(component, capability);
                out.insert(CapabilityKey::new(c, cap));
            }
            Self::Template(expr) => {
                for path in template::placeholders(expr) {
                    if let Some(r) = AttributeRef::from_path(path) {
                        let (c, cap, _) = r.qualify(component, capability);
                        out.insert(CapabilityKey::new(c, cap));
                    }
                }
            }
            Self::Mapped { key, .. } => key.collect_keys(component, capability, out),
        }
    }
}

fn parse_template(map: &Map<String, Value>) -> Option<FieldValue> {
    if map.len() != 1 {
        return None;
    }
    map.get("template")
        .and_then(Value::as_str)
        .map(|t| FieldValue::Template(t.to_owned()))
}

fn parse_mapped(map: &Map<String, Value>) -> Option<FieldValue> {
    if map.len() != 2 {
        return None;
    }
    let table = match map.get("mapping")? {
        Value::String(field) => TableSource::Field(field.clone()),
        other => TableSource::Inline(MappingTable::from_value(other)?),
    };
    let key = FieldValue::parse(map.get("key")?);
    Some(FieldValue::Mapped {
        table,
        key: Box::new(key),
    })
}

fn parse_indirect(map: &Map<String, Value>) -> Option<FieldValue> {
    if map.keys().any(|k| !INDIRECT_KEYS.contains(&k.as_str())) {
        return None;
    }
    let attribute = map.get("attribute")?.as_str()?.to_owned();
    let text = |k: &str| map.get(k).and_then(Value::as_str).map(str::to_owned);
    Some(FieldValue::Indirect(AttributeRef {
        component: text("component"),
        capability: text("capability"),
        attribute,
    }))
}
