//! Field resolution against live device status.
//!
//! A [`Resolver`] binds one descriptor to one device and answers "what is
//! field *f* of slot *s* right now". Every read goes through
//! [`StatusLookup`], so resolution always reflects the latest status the
//! store holds.

pub mod coerce;
pub mod mapping;

use serde_json::Value;

use capmesh_api::Status;

use crate::descriptor::{AttributeRef, Descriptor, FieldValue, TableSource};
use crate::error::ResolutionMiss;
use crate::model::{Device, DeviceId};
use crate::template::{self, TemplateVars};

pub use coerce::{ArgumentType, coerce, coerce_arguments};
pub use mapping::{MappingTable, get_mapping_key, get_mapping_value};

/// Read access to the live status tree of every known device.
pub trait StatusLookup: Send + Sync {
    fn status(&self, device: &DeviceId, component: &str, capability: &str, attribute: &str) -> Option<Status>;
}

/// Identifier template variables for a descriptor on a device.
pub fn identifier_vars(device: &Device, descriptor: &Descriptor) -> TemplateVars {
    TemplateVars {
        device_id: Some(device.id.to_string()),
        device_type: device.device_type.clone(),
        label: Some(device.label.clone()),
        component: Some(descriptor.component.clone()),
        capability: Some(descriptor.capability.clone()),
        attribute: descriptor.attribute.clone(),
        command: descriptor.command_identity(),
        name: descriptor.name.clone(),
    }
}

pub struct Resolver<'a> {
    lookup: &'a dyn StatusLookup,
    device: &'a Device,
    descriptor: &'a Descriptor,
}

impl<'a> Resolver<'a> {
    pub fn new(lookup: &'a dyn StatusLookup, device: &'a Device, descriptor: &'a Descriptor) -> Self {
        Self {
            lookup,
            device,
            descriptor,
        }
    }

    /// Resolve `field` of the root descriptor (`slot = None`) or of a named
    /// slot.
    ///
    /// `state` with no explicit declaration reads the descriptor's own
    /// attribute. `component`, `capability` and `attribute` answer from the
    /// descriptor itself.
    pub fn resolve(&self, slot: Option<&str>, field: &str) -> Result<Value, ResolutionMiss> {
        let d = self.descriptor.binding(slot)?;
        if let Some(value) = d.field(field) {
            return self.evaluate(d, value);
        }
        match field {
            "state" => self.own_state(d),
            "component" => Ok(Value::String(d.component.clone())),
            "capability" => Ok(Value::String(d.capability.clone())),
            "attribute" => d
                .attribute
                .clone()
                .map(Value::String)
                .ok_or(ResolutionMiss::NoAttribute),
            _ => Err(ResolutionMiss::MissingField(field.to_owned())),
        }
    }

    /// [`resolve`](Self::resolve), substituting `default` on a miss.
    pub fn resolve_or(&self, slot: Option<&str>, field: &str, default: Value) -> Value {
        self.resolve(slot, field).unwrap_or(default)
    }

    pub fn state(&self, slot: Option<&str>) -> Result<Value, ResolutionMiss> {
        self.resolve(slot, "state")
    }

    /// Full status record (value, unit, data) of the bound attribute.
    pub fn status(&self, slot: Option<&str>) -> Option<Status> {
        let d = self.descriptor.binding(slot).ok()?;
        let attribute = d.attribute.as_deref()?;
        self.lookup
            .status(&self.device.id, &d.component, &d.capability, attribute)
    }

    /// raw -> host through the table declared in `table_field`.
    pub fn get_mapping_value(&self, slot: Option<&str>, table_field: &str, raw: &Value) -> Value {
        let table = self.descriptor.binding(slot).ok().and_then(|d| d.raw_field(table_field));
        get_mapping_value(table, raw)
    }

    /// host -> raw through the table declared in `table_field`.
    pub fn get_mapping_key(&self, slot: Option<&str>, table_field: &str, host: &Value) -> Value {
        let table = self.descriptor.binding(slot).ok().and_then(|d| d.raw_field(table_field));
        get_mapping_key(table, host)
    }

    pub fn vars(&self) -> TemplateVars {
        identifier_vars(self.device, self.descriptor)
    }

    // ── Evaluation ───────────────────────────────────────────────────

    fn evaluate(&self, d: &Descriptor, value: &FieldValue) -> Result<Value, ResolutionMiss> {
        match value {
            FieldValue::Literal(v) => Ok(v.clone()),
            FieldValue::Indirect(r) => {
                let (component, capability, attribute) = r.qualify(&d.component, &d.capability);
                self.read(component, capability, attribute)
            }
            FieldValue::Template(expr) => self.render_expression(d, expr),
            FieldValue::Mapped { table, key } => {
                let key = self.evaluate(d, key)?;
                Ok(match table {
                    TableSource::Inline(t) => t.forward(&key),
                    TableSource::Field(name) => get_mapping_value(d.raw_field(name), &key),
                })
            }
        }
    }

    fn own_state(&self, d: &Descriptor) -> Result<Value, ResolutionMiss> {
        let attribute = d.attribute.as_deref().ok_or(ResolutionMiss::NoAttribute)?;
        self.read(&d.component, &d.capability, attribute)
    }

    fn read(&self, component: &str, capability: &str, attribute: &str) -> Result<Value, ResolutionMiss> {
        let status = self
            .lookup
            .status(&self.device.id, component, capability, attribute)
            .ok_or_else(|| ResolutionMiss::MissingAttribute {
                component: component.to_owned(),
                capability: capability.to_owned(),
                attribute: attribute.to_owned(),
            })?;
        if status.value.is_null() {
            return Err(ResolutionMiss::NoValue {
                component: component.to_owned(),
                capability: capability.to_owned(),
                attribute: attribute.to_owned(),
            });
        }
        Ok(status.value)
    }

    /// A template that is a single placeholder keeps the value's type and
    /// propagates misses. Mixed text renders misses as empty.
    fn render_expression(&self, d: &Descriptor, expr: &str) -> Result<Value, ResolutionMiss> {
        if let Some(name) = template::sole_placeholder(expr) {
            return self.placeholder(d, name);
        }
        let rendered = template::render_with(expr, |name| {
            self.placeholder(d, name).ok().map(|v| display(&v))
        });
        Ok(Value::String(rendered))
    }

    fn placeholder(&self, d: &Descriptor, name: &str) -> Result<Value, ResolutionMiss> {
        if let Some(r) = AttributeRef::from_path(name) {
            let (component, capability, attribute) = r.qualify(&d.component, &d.capability);
            return self.read(component, capability, attribute);
        }
        if name == "state" {
            return self.own_state(d);
        }
        identifier_vars(self.device, d)
            .get(name)
            .map(|s| Value::String(s.to_owned()))
            .ok_or_else(|| ResolutionMiss::MissingField(name.to_owned()))
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Fixed(HashMap<(String, String, String), Status>);

    impl Fixed {
        fn with(mut self, c: &str, cap: &str, attr: &str, value: Value) -> Self {
            self.0.insert((c.into(), cap.into(), attr.into()), Status::new(value));
            self
        }
    }

    impl StatusLookup for Fixed {
        fn status(&self, _: &DeviceId, c: &str, cap: &str, attr: &str) -> Option<Status> {
            self.0.get(&(c.into(), cap.into(), attr.into())).cloned()
        }
    }

    fn device() -> Device {
        Device::new("d1", "Living Room AC")
            .with_capability("main", "airConditionerMode")
            .with_capability("main", "thermostatCoolingSetpoint")
    }

    fn descriptor() -> Descriptor {
        Descriptor::parse(&json!({
            "capability": "airConditionerMode",
            "attribute": "airConditionerMode",
            "name": "%{label} mode",
            "options": { "attribute": "supportedAcModes" },
            "s2h_mode_mapping": [{ "auto": "heat_cool", "wind": "fan_only" }],
            "hvac_mode": { "mapping": "s2h_mode_mapping", "key": { "attribute": "airConditionerMode" } },
            "summary": { "template": "%{state} @ %{thermostatCoolingSetpoint/coolingSetpoint}" },
            "setpoint": { "template": "%{thermostatCoolingSetpoint/coolingSetpoint}" },
            "min_temp": 16,
            "capabilities": [
                { "slot": "target", "capability": "thermostatCoolingSetpoint", "attribute": "coolingSetpoint" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn state_defaults_to_own_attribute() {
        let lookup = Fixed::default().with("main", "airConditionerMode", "airConditionerMode", json!("wind"));
        let (device, d) = (device(), descriptor());
        let r = Resolver::new(&lookup, &device, &d);
        assert_eq!(r.state(None).unwrap(), json!("wind"));
        assert_eq!(r.resolve(None, "min_temp").unwrap(), json!(16));
    }

    #[test]
    fn indirect_mapped_and_template_fields() {
        let lookup = Fixed::default()
            .with("main", "airConditionerMode", "airConditionerMode", json!("wind"))
            .with("main", "airConditionerMode", "supportedAcModes", json!(["auto", "wind"]))
            .with("main", "thermostatCoolingSetpoint", "coolingSetpoint", json!(24));
        let (device, d) = (device(), descriptor());
        let r = Resolver::new(&lookup, &device, &d);

        assert_eq!(r.resolve(None, "options").unwrap(), json!(["auto", "wind"]));
        assert_eq!(r.resolve(None, "hvac_mode").unwrap(), json!("fan_only"));
        assert_eq!(r.resolve(None, "summary").unwrap(), json!("wind @ 24"));
        assert_eq!(r.resolve(None, "setpoint").unwrap(), json!(24));
        assert_eq!(r.state(Some("target")).unwrap(), json!(24));
    }

    #[test]
    fn misses_are_reported_not_raised() {
        let lookup = Fixed::default().with("main", "airConditionerMode", "airConditionerMode", Value::Null);
        let (device, d) = (device(), descriptor());
        let r = Resolver::new(&lookup, &device, &d);

        assert!(matches!(r.state(None), Err(ResolutionMiss::NoValue { .. })));
        assert!(matches!(r.resolve(None, "options"), Err(ResolutionMiss::MissingAttribute { .. })));
        assert!(matches!(r.resolve(None, "setpoint"), Err(ResolutionMiss::MissingAttribute { .. })));
        assert_eq!(r.resolve(None, "max_temp"), Err(ResolutionMiss::MissingField("max_temp".into())));
        assert_eq!(r.resolve(Some("fan"), "state"), Err(ResolutionMiss::UnknownSlot("fan".into())));
        assert_eq!(r.resolve_or(None, "max_temp", json!(30)), json!(30));
        assert_eq!(r.resolve(None, "summary").unwrap(), json!(" @ "));
    }

    #[test]
    fn mapping_helpers_use_declared_tables() {
        let lookup = Fixed::default();
        let (device, d) = (device(), descriptor());
        let r = Resolver::new(&lookup, &device, &d);

        assert_eq!(r.get_mapping_value(None, "s2h_mode_mapping", &json!("auto")), json!("heat_cool"));
        assert_eq!(r.get_mapping_key(None, "s2h_mode_mapping", &json!("fan_only")), json!("wind"));
        assert_eq!(r.get_mapping_value(None, "s2h_mode_mapping", &json!("cool")), json!("cool"));
        assert_eq!(r.get_mapping_value(None, "no_such_table", &json!("cool")), json!("cool"));
    }

    #[test]
    fn identifier_variables() {
        let lookup = Fixed::default();
        let (device, d) = (device(), descriptor());
        let r = Resolver::new(&lookup, &device, &d);
        let vars = r.vars();
        assert_eq!(vars.label.as_deref(), Some("Living Room AC"));
        assert_eq!(vars.name.as_deref(), Some("%{label} mode"));
        assert!(vars.command.is_none());
    }
}
