//! Placeholder values
//!
//! A placeholder map is a JSON object whose values are scalars or (nested)
//! lists of scalars. An object carrying `$attributes` is an attributed value
//! and is never accepted.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::planner::errors::{PrepareError, PrepareResult};

const ATTRIBUTES_KEY: &str = "$attributes";

#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: HashMap<String, JsonValue>,
}

impl Placeholders {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validates and wraps a placeholder argument
    pub fn from_json(argument: Option<&JsonValue>) -> PrepareResult<Self> {
        let map = match argument {
            None | Some(JsonValue::Null) => return Ok(Self::empty()),
            Some(JsonValue::Object(map)) => map,
            Some(_) => {
                return Err(PrepareError::placeholder(
                    "Incorrect placeholder argument: map expected",
                ))
            }
        };

        let mut values = HashMap::with_capacity(map.len());
        for (name, value) in map {
            match value {
                JsonValue::Object(_) => {
                    return Err(PrepareError::placeholder(format!(
                        "Incorrect placeholder map: values should be plain types or lists (key \"{}\")",
                        name
                    )))
                }
                JsonValue::Array(items) => validate_list(items)?,
                _ => {}
            }
            values.insert(name.clone(), value.clone());
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn validate_list(items: &[JsonValue]) -> PrepareResult<()> {
    for item in items {
        match item {
            JsonValue::Object(map) if map.contains_key(ATTRIBUTES_KEY) => {
                return Err(PrepareError::placeholder(
                    "Attributes inside placeholder are not allowed",
                ))
            }
            JsonValue::Object(_) => {
                return Err(PrepareError::placeholder("Maps inside placeholder are not allowed"))
            }
            JsonValue::Array(nested) => validate_list(nested)?,
            _ => {}
        }
    }
    Ok(())
}
