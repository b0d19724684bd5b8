//! Value types
//!
//! Two layers:
//! - `ValueType`: the physical type a value carries at runtime
//! - `LogicalType`: the declared column type; every logical type maps onto
//!   exactly one physical type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Type of the `null` literal before inference
    Null,
    Int64,
    Uint64,
    Double,
    Boolean,
    String,
    /// Structured payload (lists, composites)
    Any,
}

impl ValueType {
    /// Returns the lowercase type name used in diagnostics and casts
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "uint64",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Any => "any",
        }
    }

    /// Parses a type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "null" => Some(ValueType::Null),
            "int64" => Some(ValueType::Int64),
            "uint64" => Some(ValueType::Uint64),
            "double" => Some(ValueType::Double),
            "boolean" => Some(ValueType::Boolean),
            "string" => Some(ValueType::String),
            "any" => Some(ValueType::Any),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int64 | ValueType::Uint64 | ValueType::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ValueType::Int64 | ValueType::Uint64)
    }

    /// Whether values of the two types may be compared with each other
    pub fn is_comparable_with(&self, other: ValueType) -> bool {
        *self == ValueType::Null
            || other == ValueType::Null
            || *self == other
            || (self.is_numeric() && other.is_numeric())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field of a struct-typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: LogicalType,
}

/// Declared column type
///
/// Serialized either as a bare physical type name (`"int64"`) or as a
/// single-key object for the parameterized types
/// (`{"decimal": {"precision": 10, "scale": 2}}`, `{"list": "int64"}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// Fixed-point number stored in its textual form
    Decimal { precision: u8, scale: u8 },
    List(Box<LogicalType>),
    Optional(Box<LogicalType>),
    Struct(Vec<StructField>),
    #[serde(untagged)]
    Simple(ValueType),
}

impl LogicalType {
    /// Physical type carried by values of this logical type
    pub fn wire_type(&self) -> ValueType {
        match self {
            LogicalType::Simple(ty) => *ty,
            LogicalType::Decimal { .. } => ValueType::String,
            LogicalType::List(_) | LogicalType::Struct(_) => ValueType::Any,
            LogicalType::Optional(inner) => inner.wire_type(),
        }
    }

    /// Whether the logical type itself admits null
    pub fn is_optional(&self) -> bool {
        matches!(self, LogicalType::Optional(_))
    }
}

impl From<ValueType> for LogicalType {
    fn from(ty: ValueType) -> Self {
        LogicalType::Simple(ty)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Simple(ty) => write!(f, "{}", ty),
            LogicalType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            LogicalType::List(inner) => write!(f, "list<{}>", inner),
            LogicalType::Optional(inner) => write!(f, "optional<{}>", inner),
            LogicalType::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", field.name, field.field_type)?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_types() {
        assert_eq!(LogicalType::Simple(ValueType::Int64).wire_type(), ValueType::Int64);
        assert_eq!(
            LogicalType::Decimal { precision: 10, scale: 2 }.wire_type(),
            ValueType::String
        );
        assert_eq!(
            LogicalType::List(Box::new(ValueType::Int64.into())).wire_type(),
            ValueType::Any
        );
        assert_eq!(
            LogicalType::Optional(Box::new(ValueType::Double.into())).wire_type(),
            ValueType::Double
        );
    }

    #[test]
    fn test_logical_type_serde() {
        let simple: LogicalType = serde_json::from_str("\"uint64\"").unwrap();
        assert_eq!(simple, LogicalType::Simple(ValueType::Uint64));

        let list: LogicalType = serde_json::from_str("{\"list\": \"string\"}").unwrap();
        assert_eq!(list, LogicalType::List(Box::new(ValueType::String.into())));

        let decimal: LogicalType =
            serde_json::from_str("{\"decimal\": {\"precision\": 12, \"scale\": 3}}").unwrap();
        assert_eq!(decimal, LogicalType::Decimal { precision: 12, scale: 3 });
    }

    #[test]
    fn test_comparability() {
        assert!(ValueType::Int64.is_comparable_with(ValueType::Double));
        assert!(ValueType::Null.is_comparable_with(ValueType::String));
        assert!(!ValueType::String.is_comparable_with(ValueType::Int64));
    }
}
