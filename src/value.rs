//! Typed values for external variables and rule metadata.

use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed set of value kinds the engine understands.
///
/// Untyped input (e.g. JSON) is converted at the API boundary through
/// `TryFrom<serde_json::Value>`, which rejects every other kind with
/// [`CompileError::UnsupportedType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = CompileError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;

        let unsupported = |kind: &str| CompileError::UnsupportedType {
            kind: kind.to_string(),
        };
        match value {
            Json::Bool(b) => Ok(Value::Boolean(b)),
            Json::String(s) => Ok(Value::Text(s)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None if n.is_u64() => Err(unsupported("unsigned integer out of range")),
                None => Err(unsupported("float")),
            },
            Json::Null => Err(unsupported("null")),
            Json::Array(_) => Err(unsupported("array")),
            Json::Object(_) => Err(unsupported("object")),
        }
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = CompileError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Value::try_from(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_native_conversions() {
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from(-5i64), Value::Integer(-5));
        assert_eq!(Value::from(7), Value::Integer(7));
        assert_eq!(Value::from("x"), Value::Text("x".to_string()));
    }

    #[test]
    fn test_json_supported_kinds() {
        assert_eq!(Value::try_from(json!(false)).unwrap(), Value::Boolean(false));
        assert_eq!(
            Value::try_from(json!(i64::MIN)).unwrap(),
            Value::Integer(i64::MIN)
        );
        assert_eq!(
            Value::try_from(json!("abc")).unwrap(),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn test_json_unsupported_kinds() {
        for (input, kind) in [
            (json!(1.5), "float"),
            (json!(null), "null"),
            (json!([1, 2]), "array"),
            (json!({"a": 1}), "object"),
            (json!(u64::MAX), "unsigned integer out of range"),
        ] {
            match Value::try_from(&input) {
                Err(CompileError::UnsupportedType { kind: got }) => assert_eq!(got, kind),
                other => panic!("expected UnsupportedType for {input}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_display_and_kind() {
        assert_eq!(Value::Text("a".into()).to_string(), "\"a\"");
        assert_eq!(Value::Integer(3).kind(), "integer");
    }
}
