//! Table schema definitions
//!
//! A table schema is an ordered list of columns. Sort-ordered columns form the
//! key prefix and must start at index 0 without gaps. Key columns may carry a
//! computed expression (e.g. `hash64(cid)`) evaluated from other columns.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value::{LogicalType, ValueType};

use super::errors::{SchemaError, SchemaResult};

/// Sort order of a key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
    /// Nullable unless set
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    /// Computed-key expression over other columns of the same table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, logical_type: impl Into<LogicalType>) -> Self {
        Self {
            name: name.into(),
            logical_type: logical_type.into(),
            required: false,
            sort_order: None,
            expression: None,
        }
    }

    /// Marks the column as part of the key prefix
    pub fn sorted(mut self) -> Self {
        self.sort_order = Some(SortOrder::Ascending);
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Physical type of the column values
    pub fn value_type(&self) -> ValueType {
        self.logical_type.wire_type()
    }

    pub fn is_key(&self) -> bool {
        self.sort_order.is_some()
    }

    pub fn is_computed(&self) -> bool {
        self.expression.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableSchemaSpec {
    columns: Vec<ColumnSchema>,
    #[serde(default)]
    unique_keys: Option<bool>,
}

/// Immutable table schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TableSchemaSpec", into = "TableSchemaSpec")]
pub struct TableSchema {
    columns: Vec<ColumnSchema>,
    key_column_count: usize,
    unique_keys: bool,
}

impl TableSchema {
    /// Builds a schema, checking the key prefix and column name uniqueness.
    ///
    /// Keys are unique by default when the schema has a key prefix.
    pub fn new(columns: Vec<ColumnSchema>) -> SchemaResult<Self> {
        let mut key_column_count = 0;
        for (index, column) in columns.iter().enumerate() {
            if column.is_key() {
                if index != key_column_count {
                    return Err(SchemaError::invalid_key(&column.name));
                }
                key_column_count += 1;
            }
            if columns[..index].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::duplicate_column(&column.name));
            }
        }
        Ok(Self {
            columns,
            key_column_count,
            unique_keys: key_column_count > 0,
        })
    }

    pub fn with_unique_keys(mut self, unique_keys: bool) -> Self {
        self.unique_keys = unique_keys && self.key_column_count > 0;
        self
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &ColumnSchema {
        &self.columns[index]
    }

    /// Position of a column by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn key_column_count(&self) -> usize {
        self.key_column_count
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.key_column_count]
    }

    pub fn unique_keys(&self) -> bool {
        self.unique_keys
    }

    pub fn has_computed_columns(&self) -> bool {
        self.columns.iter().any(ColumnSchema::is_computed)
    }

    /// Stable content hash, used as a cache key
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(column.logical_type.to_string().as_bytes());
            hasher.update([column.required as u8, column.is_key() as u8]);
            if let Some(expression) = &column.expression {
                hasher.update(expression.as_bytes());
            }
            hasher.update([0xffu8]);
        }
        hasher.update([self.unique_keys as u8]);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl TryFrom<TableSchemaSpec> for TableSchema {
    type Error = SchemaError;

    fn try_from(spec: TableSchemaSpec) -> SchemaResult<Self> {
        let schema = TableSchema::new(spec.columns)?;
        Ok(match spec.unique_keys {
            Some(unique) => schema.with_unique_keys(unique),
            None => schema,
        })
    }
}

impl From<TableSchema> for TableSchemaSpec {
    fn from(schema: TableSchema) -> Self {
        TableSchemaSpec {
            columns: schema.columns,
            unique_keys: Some(schema.unique_keys),
        }
    }
}
