// ── Argument type coercion ──

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use strum::{Display, EnumString};

use crate::error::ArgumentTypeError;

/// Declared type of an outbound command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArgumentType {
    Int,
    Float,
    Str,
}

/// Convert one value to `ty`. Lists are converted element-wise.
pub fn coerce(value: &Value, ty: ArgumentType) -> Result<Value, ArgumentTypeError> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|v| coerce(v, ty))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    let converted = match ty {
        ArgumentType::Int => to_int(value),
        ArgumentType::Float => to_float(value),
        ArgumentType::Str => to_str(value),
    };
    converted.ok_or_else(|| ArgumentTypeError {
        value: value.clone(),
        expected: ty,
    })
}

/// Convert every argument of a command.
pub fn coerce_arguments(args: &[Value], ty: ArgumentType) -> Result<Vec<Value>, ArgumentTypeError> {
    args.iter().map(|v| coerce(v, ty)).collect()
}

fn to_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n.as_f64().and_then(integral).map(Value::from),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
                .map(Value::from)
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions, clippy::float_cmp)]
fn integral(f: f64) -> Option<i64> {
    // Beyond ±2^53 an f64 no longer represents every integer exactly.
    const LIMIT: f64 = 9_007_199_254_740_992.0;
    (f.is_finite() && f.fract() == 0.0 && f.abs() <= LIMIT).then(|| f as i64)
}

fn to_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

fn to_str(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn int_accepts_numeric_strings_and_integral_floats() {
        assert_eq!(coerce(&json!("5"), ArgumentType::Int).unwrap(), json!(5));
        assert_eq!(coerce(&json!(" 5 "), ArgumentType::Int).unwrap(), json!(5));
        assert_eq!(coerce(&json!(5.0), ArgumentType::Int).unwrap(), json!(5));
        assert_eq!(coerce(&json!("7.0"), ArgumentType::Int).unwrap(), json!(7));
        assert_eq!(coerce(&json!(-3), ArgumentType::Int).unwrap(), json!(-3));
    }

    #[test]
    fn int_rejects_garbage() {
        let err = coerce(&json!("abc"), ArgumentType::Int).unwrap_err();
        assert_eq!(err.value, json!("abc"));
        assert_eq!(err.expected, ArgumentType::Int);
        assert!(coerce(&json!(5.5), ArgumentType::Int).is_err());
        assert!(coerce(&json!(true), ArgumentType::Int).is_err());
        assert!(coerce(&Value::Null, ArgumentType::Int).is_err());
    }

    #[test]
    fn float_and_str() {
        assert_eq!(coerce(&json!("21.5"), ArgumentType::Float).unwrap(), json!(21.5));
        assert_eq!(coerce(&json!(21), ArgumentType::Float).unwrap(), json!(21.0));
        assert!(coerce(&json!("warm"), ArgumentType::Float).is_err());
        assert_eq!(coerce(&json!(21), ArgumentType::Str).unwrap(), json!("21"));
        assert!(coerce(&json!({ "a": 1 }), ArgumentType::Str).is_err());
    }

    #[test]
    fn lists_are_converted_element_wise() {
        assert_eq!(
            coerce(&json!(["1", 2.0, 3]), ArgumentType::Int).unwrap(),
            json!([1, 2, 3])
        );
        assert!(coerce(&json!(["1", "x"]), ArgumentType::Int).is_err());
        assert_eq!(
            coerce_arguments(&[json!("1"), json!(["2"])], ArgumentType::Int).unwrap(),
            vec![json!(1), json!([2])]
        );
    }

    #[test]
    fn type_names_parse() {
        assert_eq!("int".parse::<ArgumentType>().unwrap(), ArgumentType::Int);
        assert_eq!(ArgumentType::Float.to_string(), "float");
        assert!("integer".parse::<ArgumentType>().is_err());
    }
}
