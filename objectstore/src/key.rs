//! Primary and index key values.

use std::fmt;

use serde_json::Value;

/// A value usable as a primary key or as an indexed value.
///
/// Keys sort numbers before strings, numbers numerically and strings by
/// their UTF-8 bytes. `1` and `1.0` are the same key.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Number(f64),
    String(String),
}

impl Key {
    /// Extracts a key from a JSON value.
    ///
    /// Returns `None` for values that cannot act as keys: objects, arrays,
    /// booleans and null.
    pub fn from_json(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a JSON value. Integral numbers become JSON
    /// integers.
    pub fn to_json(&self) -> Value {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                Value::from(*n as i64)
            }
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::String(s) => Value::String(s.clone()),
        }
    }

    /// Returns false for NaN, which has no place in the key order.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) => !n.is_nan(),
            Key::String(_) => true,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::Number(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Number(value as f64)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Number(value as f64)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Number(value as f64)
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Number(value as f64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn should_extract_number_and_string_keys() {
        assert_eq!(Key::from_json(&json!(42)), Some(Key::Number(42.0)));
        assert_eq!(Key::from_json(&json!(1.5)), Some(Key::Number(1.5)));
        assert_eq!(
            Key::from_json(&json!("open")),
            Some(Key::String("open".to_string()))
        );
    }

    #[test]
    fn should_reject_non_key_values() {
        assert_eq!(Key::from_json(&json!(null)), None);
        assert_eq!(Key::from_json(&json!(true)), None);
        assert_eq!(Key::from_json(&json!({"a": 1})), None);
        assert_eq!(Key::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn should_convert_integral_numbers_to_json_integers() {
        assert_eq!(Key::Number(7.0).to_json(), json!(7));
        assert_eq!(Key::Number(-2.5).to_json(), json!(-2.5));
        assert_eq!(Key::from("x").to_json(), json!("x"));
    }

    #[test]
    fn should_treat_nan_as_invalid() {
        assert!(!Key::Number(f64::NAN).is_valid());
        assert!(Key::Number(0.0).is_valid());
    }
}
