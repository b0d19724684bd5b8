//! In-memory table catalog
//!
//! Loaded from a JSON document:
//!
//! ```json
//! {
//!   "tables": {
//!     "//home/t": {
//!       "schema": {"columns": [{"name": "a", "type": "int64", "sort_order": "ascending"}]},
//!       "rows": [{"a": 1}, {"a": 2}],
//!       "splits": [[10], [20]]
//!     }
//!   },
//!   "udfs": []
//! }
//! ```
//!
//! `splits` lists split boundary keys; three boundaries give four splits.
//! Computed columns are filled in on load and rows are stored in key order.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::coordinator::ColumnEvaluators;
use crate::error::{QueryError, QueryResult};
use crate::functions::{FunctionRegistry, UdfDescriptor};
use crate::planner::{PrepareError, PrepareResult, SplitProvider};
use crate::rows::Row;
use crate::schema::{DataSplit, Key, KeyRange, RowValidator, TableSchema};
use crate::value::Value;

#[derive(Debug, Deserialize)]
struct CatalogSpec {
    #[serde(default)]
    tables: BTreeMap<String, TableSpec>,
    #[serde(default)]
    udfs: Vec<UdfDescriptor>,
}

#[derive(Debug, Deserialize)]
struct TableSpec {
    schema: TableSchema,
    #[serde(default)]
    rows: Vec<JsonValue>,
    #[serde(default)]
    splits: Vec<Vec<JsonValue>>,
}

/// Rows of one table, sorted by key
#[derive(Debug)]
pub struct MemoryTable {
    path: String,
    object_id: Uuid,
    schema: Arc<TableSchema>,
    rows: Arc<Vec<Row>>,
    boundaries: Vec<Key>,
}

impl MemoryTable {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn object_id(&self) -> Uuid {
        self.object_id
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn rows(&self) -> &Arc<Vec<Row>> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Contiguous splits covering the whole key space
    pub fn splits(&self) -> Vec<DataSplit> {
        let mut bounds = vec![Key::min()];
        bounds.extend(self.boundaries.iter().cloned());
        bounds.push(Key::max());
        bounds
            .windows(2)
            .map(|pair| DataSplit::new(self.object_id, self.schema.clone()).with_bounds(pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Row positions `[start, end)` whose key falls in `range`
    pub fn slice(&self, range: &KeyRange) -> (usize, usize) {
        let width = self.schema.key_column_count();
        if width == 0 {
            // Unkeyed rows have no position in key space
            return if range.is_empty() { (0, 0) } else { (0, self.rows.len()) };
        }
        let start = self.rows.partition_point(|row| Key::from_row(row, width) < range.lower);
        let end = self.rows.partition_point(|row| Key::from_row(row, width) < range.upper);
        (start, end.max(start))
    }

    pub fn rows_in(&self, range: &KeyRange) -> &[Row] {
        let (start, end) = self.slice(range);
        &self.rows[start..end]
    }
}

/// Tables by path plus the function registry they were loaded with
pub struct Catalog {
    tables: HashMap<String, Arc<MemoryTable>>,
    registry: Arc<FunctionRegistry>,
    max_expression_depth: usize,
}

impl Catalog {
    pub fn new(registry: Arc<FunctionRegistry>, max_expression_depth: usize) -> Self {
        Self {
            tables: HashMap::new(),
            registry,
            max_expression_depth,
        }
    }

    /// Parses a catalog document. UDFs it declares are added to `base`.
    pub fn from_json(text: &str, base: &FunctionRegistry, max_expression_depth: usize) -> QueryResult<Self> {
        let spec: CatalogSpec =
            serde_json::from_str(text).map_err(|e| QueryError::catalog(format!("Invalid catalog: {}", e)))?;
        let registry = base.with_udfs(&spec.udfs)?;
        let mut catalog = Self::new(Arc::new(registry), max_expression_depth);

        for (path, table) in spec.tables {
            let validator = RowValidator::new(&table.schema);
            let rows = table
                .rows
                .iter()
                .map(|json| validator.row_from_json(json))
                .collect::<Result<Vec<_>, _>>()?;
            let boundaries = table
                .splits
                .iter()
                .map(|key| boundary_key(&table.schema, key))
                .collect::<QueryResult<Vec<_>>>()?;
            catalog.add_table(&path, table.schema, rows, boundaries)?;
        }
        Ok(catalog)
    }

    pub fn load(path: &Path, base: &FunctionRegistry, max_expression_depth: usize) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| QueryError::catalog(format!("Cannot read catalog {}: {}", path.display(), e)))?;
        Self::from_json(&text, base, max_expression_depth)
    }

    /// Adds a table. Computed columns of `rows` are recomputed; rows are
    /// sorted by key and must have unique keys when the schema says so.
    pub fn add_table(
        &mut self,
        path: &str,
        schema: TableSchema,
        rows: Vec<Row>,
        mut boundaries: Vec<Key>,
    ) -> QueryResult<Arc<MemoryTable>> {
        if self.tables.contains_key(path) {
            return Err(QueryError::catalog(format!("Table {} is defined twice", path)));
        }
        let evaluators = ColumnEvaluators::build(&schema, &self.registry, self.max_expression_depth)?;
        let width = schema.key_column_count();

        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != schema.len() {
                return Err(QueryError::catalog(format!(
                    "Row of {} has {} columns, expected {}",
                    path,
                    row.len(),
                    schema.len()
                )));
            }
            let row = fill_computed(row, &evaluators)?;
            keyed.push((Key::from_row(&row, width), row));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        if schema.unique_keys() {
            if let Some(pair) = keyed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
                return Err(QueryError::catalog(format!("Duplicate key {} in {}", pair[0].0, path)));
            }
        }

        boundaries.sort();
        boundaries.dedup();
        let table = Arc::new(MemoryTable {
            path: path.to_string(),
            object_id: Uuid::new_v4(),
            schema: Arc::new(schema),
            rows: Arc::new(keyed.into_iter().map(|(_, row)| row).collect()),
            boundaries,
        });
        self.tables.insert(path.to_string(), table.clone());
        Ok(table)
    }

    pub fn table(&self, path: &str) -> Option<&Arc<MemoryTable>> {
        self.tables.get(path)
    }

    pub fn require(&self, path: &str) -> QueryResult<&Arc<MemoryTable>> {
        self.table(path)
            .ok_or_else(|| QueryError::catalog(format!("Table {} is not in the catalog", path)))
    }

    /// Table paths in sorted order
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        paths.sort();
        paths
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn max_expression_depth(&self) -> usize {
        self.max_expression_depth
    }
}

impl SplitProvider for Catalog {
    fn get_initial_split<'a>(&'a self, path: &'a str) -> BoxFuture<'a, PrepareResult<DataSplit>> {
        let split = self
            .table(path)
            .map(|table| DataSplit::new(table.object_id, table.schema.clone()))
            .ok_or_else(|| PrepareError::table_not_found(path));
        future::ready(split).boxed()
    }
}

fn fill_computed(row: Row, evaluators: &ColumnEvaluators) -> QueryResult<Row> {
    if evaluators.is_empty() {
        return Ok(row);
    }
    let mut values = row.into_values();
    for index in 0..values.len() {
        if let Some(column) = evaluators.get(index) {
            values[index] = column.evaluate(&values)?;
        }
    }
    Ok(Row::new(values))
}

fn boundary_key(schema: &TableSchema, values: &[JsonValue]) -> QueryResult<Key> {
    if values.len() > schema.key_column_count() {
        return Err(QueryError::catalog(format!(
            "Split boundary has {} values but the key has {} columns",
            values.len(),
            schema.key_column_count()
        )));
    }
    let parts = values
        .iter()
        .zip(schema.key_columns())
        .map(|(json, column)| {
            Value::from_json(json, column.value_type())
                .map_err(|reason| QueryError::catalog(format!("Bad boundary value for {}: {}", column.name, reason)))
        })
        .collect::<QueryResult<Vec<_>>>()?;
    Ok(Key::from_values(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::KeyPart;

    const CATALOG: &str = r#"{
        "tables": {
            "//t": {
                "schema": {"columns": [
                    {"name": "h", "type": "int64", "sort_order": "ascending", "expression": "k % 2"},
                    {"name": "k", "type": "int64", "sort_order": "ascending"},
                    {"name": "v", "type": "string"}
                ]},
                "rows": [{"k": 3, "v": "c"}, {"k": 2, "v": "b"}, {"k": 1, "v": "a"}],
                "splits": [[1]]
            }
        }
    }"#;

    fn catalog() -> Catalog {
        Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap()
    }

    #[test]
    fn test_rows_sorted_with_computed_keys() {
        let catalog = catalog();
        let table = catalog.table("//t").unwrap();
        let keys: Vec<_> = table.rows().iter().map(|r| (r[0].clone(), r[1].clone())).collect();
        assert_eq!(
            keys,
            vec![
                (Value::Int64(0), Value::Int64(2)),
                (Value::Int64(1), Value::Int64(1)),
                (Value::Int64(1), Value::Int64(3)),
            ]
        );
    }

    #[test]
    fn test_splits_cover_key_space() {
        let catalog = catalog();
        let splits = catalog.table("//t").unwrap().splits();
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].range.lower, Key::min());
        assert_eq!(splits[1].range.upper, Key::max());
        assert_eq!(splits[0].range.upper, splits[1].range.lower);
    }

    #[test]
    fn test_slice() {
        let catalog = catalog();
        let table = catalog.table("//t").unwrap();
        let one = Key::from_values(vec![Value::Int64(1)]);
        let range = KeyRange::new(one.clone(), one.with(KeyPart::Max));
        assert_eq!(table.rows_in(&range).len(), 2);
        assert_eq!(table.rows_in(&KeyRange::universal()).len(), 3);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let text = r#"{"tables": {"//t": {
            "schema": {"columns": [{"name": "k", "type": "int64", "sort_order": "ascending"}]},
            "rows": [{"k": 1}, {"k": 1}]
        }}}"#;
        let err = Catalog::from_json(text, &FunctionRegistry::builtin(), 50).err().unwrap();
        assert!(err.to_string().contains("Duplicate key"));
    }

    #[test]
    fn test_invalid_row_is_schema_error() {
        let text = r#"{"tables": {"//t": {
            "schema": {"columns": [{"name": "k", "type": "int64"}]},
            "rows": [{"k": "one"}]
        }}}"#;
        let err = Catalog::from_json(text, &FunctionRegistry::builtin(), 50).err().unwrap();
        assert!(matches!(err, QueryError::Schema(_)));
    }

    #[tokio::test]
    async fn test_split_provider() {
        let catalog = catalog();
        let split = catalog.get_initial_split("//t").await.unwrap();
        assert_eq!(split.range, KeyRange::universal());
        assert!(catalog.get_initial_split("//missing").await.is_err());
    }
}
