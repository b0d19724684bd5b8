//! Rows and row batches

use std::ops::Index;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::value::Value;

/// A schema-indexed sequence of values
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// A row of `width` nulls
    pub fn nulls(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Appends the values of `other`
    pub fn concat(mut self, other: &[Value]) -> Self {
        self.values.extend_from_slice(other);
        self
    }

    /// Approximate footprint in bytes
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Row>() + self.values.iter().map(Value::estimated_size).sum::<usize>()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// Immutable, shareable sequence of rows
///
/// Cloning a batch shares the underlying rows.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    rows: Arc<Vec<Row>>,
}

impl RowBatch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Arc::new(rows),
        }
    }

    /// A batch with no rows, signalling "nothing ready yet" from a reader
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Takes the rows out, cloning only if the batch is shared
    pub fn into_rows(self) -> Vec<Row> {
        Arc::try_unwrap(self.rows).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Adaptive read size: starts small and doubles up to the configured maximum
#[derive(Debug, Clone)]
pub struct BatchSizer {
    current: usize,
    max: usize,
}

impl BatchSizer {
    /// Smallest read issued by a fresh pipeline
    pub const MIN_ROWS_PER_READ: usize = 64;

    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            current: Self::MIN_ROWS_PER_READ.min(max),
            max,
        }
    }

    /// Size of the next read
    pub fn next_size(&mut self) -> usize {
        let size = self.current;
        self.current = (self.current * 2).min(self.max);
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_concat() {
        let row = Row::new(vec![Value::Int64(1)]).concat(&[Value::Null, Value::from("x")]);
        assert_eq!(row.len(), 3);
        assert_eq!(row[2], Value::from("x"));
    }

    #[test]
    fn test_batch_into_rows_shared() {
        let batch = RowBatch::new(vec![Row::new(vec![Value::Int64(1)])]);
        let shared = batch.clone();
        assert_eq!(batch.into_rows().len(), 1);
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn test_batch_sizer_doubles() {
        let mut sizer = BatchSizer::new(300);
        assert_eq!(sizer.next_size(), 64);
        assert_eq!(sizer.next_size(), 128);
        assert_eq!(sizer.next_size(), 256);
        assert_eq!(sizer.next_size(), 300);
        assert_eq!(sizer.next_size(), 300);
    }

    #[test]
    fn test_batch_sizer_small_max() {
        let mut sizer = BatchSizer::new(10);
        assert_eq!(sizer.next_size(), 10);
    }
}
