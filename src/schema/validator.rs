//! Row validation against a table schema
//!
//! Rules:
//! - Every value has the column's physical type or is null
//! - Required columns are never null
//! - JSON rows may not carry undeclared columns
//! - Computed columns may be omitted from JSON input; they are filled later

use serde_json::Value as JsonValue;

use crate::rows::Row;
use crate::value::Value;

use super::errors::{SchemaError, SchemaResult, ValidationDetails};
use super::types::TableSchema;

/// Stateless validator over one schema
pub struct RowValidator<'a> {
    schema: &'a TableSchema,
}

impl<'a> RowValidator<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    /// Checks a row in schema layout
    pub fn validate(&self, row: &Row) -> SchemaResult<()> {
        if row.len() != self.schema.len() {
            return Err(SchemaError::validation_failed(ValidationDetails::new(
                "$row",
                format!("{} values", self.schema.len()),
                format!("{} values", row.len()),
            )));
        }
        for (column, value) in self.schema.columns().iter().zip(row.values()) {
            if value.is_null() {
                if column.required {
                    return Err(SchemaError::validation_failed(ValidationDetails::null_value(
                        &column.name,
                    )));
                }
                continue;
            }
            if value.value_type() != column.value_type() {
                return Err(SchemaError::validation_failed(ValidationDetails::new(
                    &column.name,
                    column.value_type().as_str(),
                    value.value_type().as_str(),
                )));
            }
        }
        Ok(())
    }

    /// Converts a JSON object into a row in schema layout
    pub fn row_from_json(&self, json: &JsonValue) -> SchemaResult<Row> {
        let object = json.as_object().ok_or_else(|| {
            SchemaError::validation_failed(ValidationDetails::new("$row", "object", json_type_name(json)))
        })?;

        if let Some(extra) = object.keys().find(|name| self.schema.find_column(name).is_none()) {
            return Err(SchemaError::validation_failed(ValidationDetails::extra_column(extra)));
        }

        let mut values = Vec::with_capacity(self.schema.len());
        for column in self.schema.columns() {
            let value = match object.get(&column.name) {
                Some(raw) => Value::from_json(raw, column.value_type()).map_err(|reason| {
                    SchemaError::validation_failed(ValidationDetails::new(
                        &column.name,
                        column.value_type().as_str(),
                        reason,
                    ))
                })?,
                None => Value::Null,
            };
            values.push(value);
        }

        let row = Row::new(values);
        for (column, value) in self.schema.columns().iter().zip(row.values()) {
            if column.required && value.is_null() && !column.is_computed() {
                return Err(SchemaError::validation_failed(ValidationDetails::null_value(
                    &column.name,
                )));
            }
        }
        Ok(row)
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
