//! Data splits

use std::sync::Arc;

use uuid::Uuid;

use super::key::{Key, KeyRange};
use super::types::TableSchema;

/// A key-bounded shard of a table
///
/// Produced by the split provider; the coordinator only derives new ranges
/// from it and never mutates it.
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub object_id: Uuid,
    pub schema: Arc<TableSchema>,
    pub range: KeyRange,
}

impl DataSplit {
    /// Split covering the whole key space
    pub fn new(object_id: Uuid, schema: Arc<TableSchema>) -> Self {
        Self {
            object_id,
            schema,
            range: KeyRange::universal(),
        }
    }

    pub fn with_bounds(mut self, lower: Key, upper: Key) -> Self {
        self.range = KeyRange::new(lower, upper);
        self
    }

    pub fn lower_bound(&self) -> &Key {
        &self.range.lower
    }

    pub fn upper_bound(&self) -> &Key {
        &self.range.upper
    }
}
