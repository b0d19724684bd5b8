//! Column resolution across the primary table and joined tables
//!
//! A source with an alias is reachable only through `alias.column`; a source
//! without one only through bare column names. Every column gets a unique
//! name inside the query: `alias.column` for aliased sources, the bare name
//! when free, otherwise `[path].column`.

use std::collections::HashMap;

use super::errors::{PrepareError, PrepareResult};
use super::query::ColumnMapping;
use crate::parser::ColumnRef;
use crate::schema::TableSchema;
use crate::value::ValueType;

#[derive(Debug, Clone)]
struct Source {
    alias: Option<String>,
    /// Schema column name to resolved column
    columns: Vec<(String, ColumnMapping)>,
}

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    sources: Vec<Source>,
    /// Resolved name to type, for every visible column
    types: HashMap<String, ValueType>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    fn unique_name(&self, alias: Option<&str>, path: &str, column: &str) -> String {
        match alias {
            Some(alias) => format!("{}.{}", alias, column),
            None if !self.types.contains_key(column) => column.to_string(),
            None => format!("[{}].{}", path, column),
        }
    }

    /// Adds a table; `merged` maps schema column names onto existing columns
    /// (USING). Returns the mapping of every schema column.
    pub fn add_source(
        &mut self,
        path: &str,
        alias: Option<&str>,
        schema: &TableSchema,
        merged: &HashMap<String, ColumnMapping>,
    ) -> PrepareResult<Vec<ColumnMapping>> {
        if let Some(alias) = alias {
            if self.sources.iter().any(|s| s.alias.as_deref() == Some(alias)) {
                return Err(PrepareError::alias_collision(alias));
            }
        }

        let mut mappings = Vec::with_capacity(schema.len());
        for (index, column) in schema.columns().iter().enumerate() {
            let mapping = match merged.get(&column.name) {
                Some(existing) => ColumnMapping {
                    name: existing.name.clone(),
                    column: column.name.clone(),
                    index,
                    ty: column.value_type(),
                },
                None => {
                    let name = self.unique_name(alias, path, &column.name);
                    self.types.insert(name.clone(), column.value_type());
                    ColumnMapping {
                        name,
                        column: column.name.clone(),
                        index,
                        ty: column.value_type(),
                    }
                }
            };
            mappings.push(mapping);
        }

        self.sources.push(Source {
            alias: alias.map(str::to_string),
            columns: mappings
                .iter()
                .map(|m| (m.column.clone(), m.clone()))
                .collect(),
        });
        Ok(mappings)
    }

    /// Resolves a reference to its unique name and type
    pub fn resolve(&self, reference: &ColumnRef) -> PrepareResult<(String, ValueType)> {
        let found: Vec<&ColumnMapping> = match &reference.table {
            Some(table) => self
                .sources
                .iter()
                .filter(|s| s.alias.as_deref() == Some(table.as_str()))
                .flat_map(|s| s.columns.iter())
                .filter(|(column, _)| *column == reference.name)
                .map(|(_, m)| m)
                .collect(),
            None => self
                .sources
                .iter()
                .filter(|s| s.alias.is_none())
                .flat_map(|s| s.columns.iter())
                .filter(|(column, _)| *column == reference.name)
                .map(|(_, m)| m)
                .collect(),
        };

        let mut names: Vec<&ColumnMapping> = Vec::new();
        for mapping in found {
            if !names.iter().any(|m| m.name == mapping.name) {
                names.push(mapping);
            }
        }
        match names.as_slice() {
            [] => Err(PrepareError::unresolved_reference(&reference.display_name())),
            [mapping] => Ok((mapping.name.clone(), mapping.ty)),
            _ => Err(PrepareError::ambiguous_reference(&reference.display_name())),
        }
    }

    /// Resolves a USING column among every source regardless of aliases
    pub fn resolve_using(&self, column: &str) -> PrepareResult<ColumnMapping> {
        let mut found: Vec<&ColumnMapping> = Vec::new();
        for source in &self.sources {
            for (name, mapping) in &source.columns {
                if name == column && !found.iter().any(|m| m.name == mapping.name) {
                    found.push(mapping);
                }
            }
        }
        match found.as_slice() {
            [] => Err(PrepareError::unresolved_reference(column)),
            [mapping] => Ok((*mapping).clone()),
            _ => Err(PrepareError::ambiguous_reference(column)),
        }
    }

    /// Columns produced by `*`: every source in order, merged columns once
    pub fn star(&self) -> PrepareResult<Vec<(String, String, ValueType)>> {
        let mut items: Vec<(String, String, ValueType)> = Vec::new();
        for source in &self.sources {
            for (column, mapping) in &source.columns {
                if items.iter().any(|(name, _, _)| *name == mapping.name) {
                    continue;
                }
                let display = match &source.alias {
                    Some(alias) => format!("{}.{}", alias, column),
                    None => column.clone(),
                };
                if items.iter().any(|(_, shown, _)| *shown == display) {
                    return Err(PrepareError::ambiguous_reference(&display));
                }
                items.push((mapping.name.clone(), display, mapping.ty));
            }
        }
        Ok(items)
    }

    pub fn type_of(&self, name: &str) -> Option<ValueType> {
        self.types.get(name).copied()
    }
}
