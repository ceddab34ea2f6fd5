// ── Value mapping tables ──
//
// Translate between device-native ("raw") values and host-facing values.
// Lookups never fail: anything the table does not cover passes through.

use serde_json::{Map, Value};

/// An ordered raw-to-host table. Keys are the raw values as strings; a key
/// that reads as a number or boolean stands for that typed raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable(Map<String, Value>);

impl MappingTable {
    /// Parse a table from settings. Accepts a plain object or the list form
    /// `[{raw: host, ...}]`, where only the first element is used.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map.clone())),
            Value::Array(items) => items.first()?.as_object().map(|m| Self(m.clone())),
            _ => None,
        }
    }

    /// raw -> host. Identity when the raw value is not a key.
    pub fn forward(&self, raw: &Value) -> Value {
        table_key(raw)
            .and_then(|key| self.0.get(key.as_ref()))
            .cloned()
            .unwrap_or_else(|| raw.clone())
    }

    /// host -> raw. The first key (in declaration order) whose value equals
    /// `host` wins; identity when no entry matches.
    pub fn reverse(&self, host: &Value) -> Value {
        self.0
            .iter()
            .find(|(_, v)| *v == host)
            .map_or_else(|| host.clone(), |(k, _)| raw_key(k))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn table_key(raw: &Value) -> Option<std::borrow::Cow<'_, str>> {
    match raw {
        Value::String(s) => Some(std::borrow::Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(std::borrow::Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(std::borrow::Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Recover the raw value a key was written for. YAML keys such as `1` or
/// `true` arrive here as text.
fn raw_key(key: &str) -> Value {
    match key {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => key
            .parse::<serde_json::Number>()
            .map_or_else(|_| Value::String(key.to_owned()), Value::Number),
    }
}

/// raw -> host against a table as written in settings. A missing or
/// malformed table behaves as the identity.
pub fn get_mapping_value(table: Option<&Value>, raw: &Value) -> Value {
    match table.and_then(MappingTable::from_value) {
        Some(t) => t.forward(raw),
        None => raw.clone(),
    }
}

/// host -> raw against a table as written in settings.
pub fn get_mapping_key(table: Option<&Value>, host: &Value) -> Value {
    match table.and_then(MappingTable::from_value) {
        Some(t) => t.reverse(host),
        None => host.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn modes() -> MappingTable {
        MappingTable::from_value(&json!([{ "auto": "heat_cool", "cool": "cool", "wind": "fan_only" }])).unwrap()
    }

    #[test]
    fn forward_maps_known_and_passes_unknown() {
        let t = modes();
        assert_eq!(t.forward(&json!("wind")), json!("fan_only"));
        assert_eq!(t.forward(&json!("dry")), json!("dry"));
        assert_eq!(t.forward(&Value::Null), Value::Null);
    }

    #[test]
    fn reverse_round_trips_keys() {
        let t = modes();
        for raw in ["auto", "cool", "wind"] {
            let raw = json!(raw);
            assert_eq!(t.reverse(&t.forward(&raw)), raw);
        }
        assert_eq!(t.reverse(&json!("off")), json!("off"));
    }

    #[test]
    fn reverse_prefers_first_declared_key() {
        let t = MappingTable::from_value(&json!({ "low": "quiet", "sleep": "quiet" })).unwrap();
        assert_eq!(t.reverse(&json!("quiet")), json!("low"));
    }

    #[test]
    fn numeric_raw_values_match_string_keys() {
        let t = MappingTable::from_value(&json!({ "1": "one" })).unwrap();
        assert_eq!(t.forward(&json!(1)), json!("one"));
    }

    #[test]
    fn reverse_restores_typed_keys() {
        let speeds = MappingTable::from_value(&json!({ "0": "off", "1": "low", "2.5": "mid" })).unwrap();
        for raw in [json!(0), json!(1), json!(2.5)] {
            assert_eq!(speeds.reverse(&speeds.forward(&raw)), raw);
        }

        let power = MappingTable::from_value(&json!({ "true": "on", "false": "off" })).unwrap();
        assert_eq!(power.reverse(&json!("on")), json!(true));
        assert_eq!(power.reverse(&power.forward(&json!(false))), json!(false));

        let named = MappingTable::from_value(&json!({ "01": "one", "1st": "first" })).unwrap();
        assert_eq!(named.reverse(&json!("one")), json!("01"));
        assert_eq!(named.reverse(&json!("first")), json!("1st"));
    }

    #[test]
    fn malformed_tables_are_identity() {
        assert_eq!(get_mapping_value(Some(&json!("nope")), &json!("a")), json!("a"));
        assert_eq!(get_mapping_value(Some(&json!([])), &json!("a")), json!("a"));
        assert_eq!(get_mapping_key(None, &json!("a")), json!("a"));
        assert_eq!(get_mapping_key(Some(&json!({ "x": "a" })), &json!("a")), json!("x"));
    }
}
