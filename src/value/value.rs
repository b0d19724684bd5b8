//! Runtime values
//!
//! Ordering rules:
//! - `Ord` is the total key order: `Null < Int64 < Uint64 < Double < Boolean < String < Any`,
//!   values of one type compare by value, doubles by `f64::total_cmp`
//! - `compare` is the expression-level comparison: numeric types widen into each
//!   other and a NaN operand is an error

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use super::types::ValueType;

/// A single typed value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Boolean(bool),
    String(String),
    Any(JsonValue),
}

/// Failure of an expression-level comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareError {
    /// One side is NaN
    Nan,
    /// The operands have types that cannot be ordered against each other
    Incompatible(ValueType, ValueType),
}

impl fmt::Display for CompareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareError::Nan => write!(f, "Comparison with NaN"),
            CompareError::Incompatible(l, r) => {
                write!(f, "Cannot compare values of types {} and {}", l, r)
            }
        }
    }
}

impl Value {
    /// Physical type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Int64(_) => ValueType::Int64,
            Value::Uint64(_) => ValueType::Uint64,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Any(_) => ValueType::Any,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Double(d) if d.is_nan())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Uint64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int64(_) => 1,
            Value::Uint64(_) => 2,
            Value::Double(_) => 3,
            Value::Boolean(_) => 4,
            Value::String(_) => 5,
            Value::Any(_) => 6,
        }
    }

    /// Expression-level comparison with numeric widening.
    ///
    /// Null sorts before every other value. NaN on either side fails.
    pub fn compare(&self, other: &Value) -> Result<Ordering, CompareError> {
        if self.is_nan() || other.is_nan() {
            return Err(CompareError::Nan);
        }
        if let Some(ordering) = compare_numeric(self, other) {
            return Ok(ordering);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (Value::Any(a), Value::Any(b)) => Ok(a.to_string().cmp(&b.to_string())),
            _ => Err(CompareError::Incompatible(self.value_type(), other.value_type())),
        }
    }

    /// Total order with numeric widening; NaN sorts by `f64::total_cmp`.
    ///
    /// Used where a comparison must not fail, e.g. range bounds.
    pub fn widened_cmp(&self, other: &Value) -> Ordering {
        if !self.is_nan() && !other.is_nan() {
            if let Some(ordering) = compare_numeric(self, other) {
                return ordering;
            }
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => self.cmp(other),
        }
    }

    /// Converts the value to `target` if no information is lost.
    ///
    /// Used to fit literals to the type of the expression they meet.
    pub fn coerce_lossless(&self, target: ValueType) -> Option<Value> {
        if self.is_null() || self.value_type() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Int64(v), ValueType::Uint64) if *v >= 0 => Some(Value::Uint64(*v as u64)),
            (Value::Uint64(v), ValueType::Int64) if *v <= i64::MAX as u64 => {
                Some(Value::Int64(*v as i64))
            }
            (Value::Int64(v), ValueType::Double) if v.unsigned_abs() <= (1u64 << 53) => {
                Some(Value::Double(*v as f64))
            }
            (Value::Uint64(v), ValueType::Double) if *v <= (1u64 << 53) => {
                Some(Value::Double(*v as f64))
            }
            (Value::Double(d), ValueType::Int64)
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d < i64::MAX as f64 =>
            {
                Some(Value::Int64(*d as i64))
            }
            (Value::Double(d), ValueType::Uint64)
                if d.fract() == 0.0 && *d >= 0.0 && *d < u64::MAX as f64 =>
            {
                Some(Value::Uint64(*d as u64))
            }
            _ => None,
        }
    }

    /// Explicit conversion; fails on out-of-range or malformed input.
    pub fn cast(&self, target: ValueType) -> Result<Value, String> {
        if self.is_null() || self.value_type() == target {
            return Ok(self.clone());
        }
        let out_of_range = || format!("Value {} is out of range for type {}", self, target);
        let malformed = || format!("Cannot cast {} value {} to {}", self.value_type(), self, target);
        match target {
            ValueType::Int64 => match self {
                Value::Uint64(v) => i64::try_from(*v).map(Value::Int64).map_err(|_| out_of_range()),
                Value::Double(d) => {
                    if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                        Ok(Value::Int64(d.trunc() as i64))
                    } else {
                        Err(out_of_range())
                    }
                }
                Value::Boolean(b) => Ok(Value::Int64(i64::from(*b))),
                Value::String(s) => s.trim().parse::<i64>().map(Value::Int64).map_err(|_| malformed()),
                Value::Any(JsonValue::Number(n)) => n.as_i64().map(Value::Int64).ok_or_else(malformed),
                _ => Err(malformed()),
            },
            ValueType::Uint64 => match self {
                Value::Int64(v) => u64::try_from(*v).map(Value::Uint64).map_err(|_| out_of_range()),
                Value::Double(d) => {
                    if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                        Ok(Value::Uint64(d.trunc() as u64))
                    } else {
                        Err(out_of_range())
                    }
                }
                Value::Boolean(b) => Ok(Value::Uint64(u64::from(*b))),
                Value::String(s) => s.trim().parse::<u64>().map(Value::Uint64).map_err(|_| malformed()),
                Value::Any(JsonValue::Number(n)) => n.as_u64().map(Value::Uint64).ok_or_else(malformed),
                _ => Err(malformed()),
            },
            ValueType::Double => match self {
                Value::Int64(v) => Ok(Value::Double(*v as f64)),
                Value::Uint64(v) => Ok(Value::Double(*v as f64)),
                Value::Boolean(b) => Ok(Value::Double(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s.trim().parse::<f64>().map(Value::Double).map_err(|_| malformed()),
                Value::Any(JsonValue::Number(n)) => n.as_f64().map(Value::Double).ok_or_else(malformed),
                _ => Err(malformed()),
            },
            ValueType::Boolean => match self {
                Value::Int64(v) => Ok(Value::Boolean(*v != 0)),
                Value::Uint64(v) => Ok(Value::Boolean(*v != 0)),
                Value::Double(d) => Ok(Value::Boolean(*d != 0.0)),
                Value::String(s) => match s.trim() {
                    "true" => Ok(Value::Boolean(true)),
                    "false" => Ok(Value::Boolean(false)),
                    _ => Err(malformed()),
                },
                Value::Any(JsonValue::Bool(b)) => Ok(Value::Boolean(*b)),
                _ => Err(malformed()),
            },
            ValueType::String => match self {
                Value::Int64(v) => Ok(Value::String(v.to_string())),
                Value::Uint64(v) => Ok(Value::String(v.to_string())),
                Value::Double(d) => Ok(Value::String(d.to_string())),
                Value::Boolean(b) => Ok(Value::String(b.to_string())),
                Value::Any(JsonValue::String(s)) => Ok(Value::String(s.clone())),
                _ => Err(malformed()),
            },
            ValueType::Any => Ok(Value::Any(self.to_json())),
            ValueType::Null => Err(malformed()),
        }
    }

    /// Decodes a JSON value as a value of the given physical type
    pub fn from_json(json: &JsonValue, ty: ValueType) -> Result<Value, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || format!("Expected {} value, found {}", ty, json);
        match ty {
            ValueType::Int64 => json.as_i64().map(Value::Int64).ok_or_else(mismatch),
            ValueType::Uint64 => json.as_u64().map(Value::Uint64).ok_or_else(mismatch),
            ValueType::Double => json.as_f64().map(Value::Double).ok_or_else(mismatch),
            ValueType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
            ValueType::String => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            ValueType::Any => Ok(Value::Any(json.clone())),
            ValueType::Null => Err(mismatch()),
        }
    }

    /// Decodes a scalar JSON value picking the narrowest matching type
    pub fn from_json_scalar(json: &JsonValue) -> Option<Value> {
        match json {
            JsonValue::Null => Some(Value::Null),
            JsonValue::Bool(b) => Some(Value::Boolean(*b)),
            JsonValue::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Some(Value::Int64(v))
                } else if let Some(v) = n.as_u64() {
                    Some(Value::Uint64(v))
                } else {
                    n.as_f64().map(Value::Double)
                }
            }
            JsonValue::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Int64(v) => JsonValue::from(*v),
            Value::Uint64(v) => JsonValue::from(*v),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(d.to_string())),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Any(json) => json.clone(),
        }
    }

    /// Approximate heap footprint, for memory accounting
    pub fn estimated_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::String(s) => inline + s.len(),
            Value::Any(json) => inline + json.to_string().len(),
            _ => inline,
        }
    }
}

fn compare_numeric(a: &Value, b: &Value) -> Option<Ordering> {
    let ordering = match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Uint64(x), Value::Uint64(y)) => x.cmp(y),
        (Value::Int64(x), Value::Uint64(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::Uint64(x), Value::Int64(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y)?,
        (Value::Double(x), Value::Int64(y)) => x.partial_cmp(&(*y as f64))?,
        (Value::Double(x), Value::Uint64(y)) => x.partial_cmp(&(*y as f64))?,
        (Value::Int64(x), Value::Double(y)) => (*x as f64).partial_cmp(y)?,
        (Value::Uint64(x), Value::Double(y)) => (*x as f64).partial_cmp(y)?,
        _ => return None,
    };
    Some(ordering)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Uint64(a), Value::Uint64(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Any(a), Value::Any(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int64(v) => v.hash(state),
            Value::Uint64(v) => v.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::String(s) => s.hash(state),
            Value::Any(json) => json.to_string().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Uint64(v) => write!(f, "{}u", v),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Any(json) => write!(f, "{}", json),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_by_type_rank() {
        let mut values = vec![
            Value::from("a"),
            Value::Boolean(false),
            Value::Double(1.5),
            Value::Uint64(3),
            Value::Int64(7),
            Value::Null,
        ];
        values.sort();
        let types: Vec<_> = values.iter().map(Value::value_type).collect();
        assert_eq!(
            types,
            vec![
                ValueType::Null,
                ValueType::Int64,
                ValueType::Uint64,
                ValueType::Double,
                ValueType::Boolean,
                ValueType::String,
            ]
        );
    }

    #[test]
    fn test_widened_compare() {
        assert_eq!(Value::Int64(-1).compare(&Value::Uint64(0)), Ok(Ordering::Less));
        assert_eq!(Value::Int64(4).compare(&Value::Double(4.0)), Ok(Ordering::Equal));
        assert_eq!(Value::Uint64(u64::MAX).compare(&Value::Int64(i64::MAX)), Ok(Ordering::Greater));
    }

    #[test]
    fn test_compare_nan_fails() {
        assert_eq!(
            Value::Double(f64::NAN).compare(&Value::Double(1.0)),
            Err(CompareError::Nan)
        );
    }

    #[test]
    fn test_compare_incompatible() {
        assert!(matches!(
            Value::from("x").compare(&Value::Int64(1)),
            Err(CompareError::Incompatible(ValueType::String, ValueType::Int64))
        ));
    }

    #[test]
    fn test_coerce_lossless() {
        assert_eq!(Value::Double(4.0).coerce_lossless(ValueType::Int64), Some(Value::Int64(4)));
        assert_eq!(Value::Double(4.5).coerce_lossless(ValueType::Int64), None);
        assert_eq!(Value::Int64(-10).coerce_lossless(ValueType::Uint64), None);
        assert_eq!(Value::Uint64(1).coerce_lossless(ValueType::Int64), Some(Value::Int64(1)));
    }

    #[test]
    fn test_cast_failures() {
        assert!(Value::from("abc").cast(ValueType::Int64).is_err());
        assert!(Value::Int64(-1).cast(ValueType::Uint64).is_err());
        assert!(Value::Double(f64::INFINITY).cast(ValueType::Int64).is_err());
        assert_eq!(Value::from("42").cast(ValueType::Int64), Ok(Value::Int64(42)));
        assert_eq!(Value::Double(-3.7).cast(ValueType::Int64), Ok(Value::Int64(-3)));
    }

    #[test]
    fn test_json_round_trip_types() {
        let json = serde_json::json!(5);
        assert_eq!(Value::from_json(&json, ValueType::Uint64), Ok(Value::Uint64(5)));
        assert_eq!(Value::from_json(&json, ValueType::Double), Ok(Value::Double(5.0)));
        assert!(Value::from_json(&serde_json::json!("x"), ValueType::Int64).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Uint64(3).to_string(), "3u");
        assert_eq!(Value::Double(4.0).to_string(), "4.0");
        assert_eq!(Value::from("p").to_string(), "\"p\"");
    }
}
