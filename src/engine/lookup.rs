//! Foreign lookups against catalog tables

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use super::catalog::MemoryTable;
use crate::error::QueryResult;
use crate::evaluator::{
    compile_expr, CompiledExpr, EvaluationResult, JoinSubquery, JoinSubqueryEvaluator, Layout,
};
use crate::functions::FunctionRegistry;
use crate::observability::{log_event_with_fields, Event};
use crate::planner::JoinClause;
use crate::rows::{MemoryReader, RowBuffer, RowReader};
use crate::schema::KeyRange;
use crate::value::Value;

/// Serves join subqueries of one clause from the pruned ranges of its
/// foreign table. Rows come back in key order and only when their key
/// tuple was asked for.
pub struct CatalogLookup {
    table: Arc<MemoryTable>,
    ranges: Vec<KeyRange>,
    keys: Vec<CompiledExpr>,
}

impl CatalogLookup {
    pub fn new(
        table: Arc<MemoryTable>,
        clause: &JoinClause,
        ranges: Vec<KeyRange>,
        registry: &FunctionRegistry,
    ) -> QueryResult<Self> {
        let layout = Layout::new(clause.foreign_columns.iter().map(|c| c.name.clone()));
        let keys = clause
            .equations
            .iter()
            .map(|(_, foreign)| compile_expr(foreign, &layout, registry))
            .collect::<EvaluationResult<Vec<_>>>()?;
        Ok(Self { table, ranges, keys })
    }

    fn key_of(&self, values: &[Value]) -> EvaluationResult<Vec<Value>> {
        self.keys.iter().map(|key| key(values)).collect()
    }
}

impl JoinSubqueryEvaluator for CatalogLookup {
    fn evaluate<'a>(
        &'a self,
        subquery: &'a JoinSubquery,
        keys: Vec<Vec<Value>>,
        buffer: &'a mut RowBuffer,
    ) -> BoxFuture<'a, EvaluationResult<Box<dyn RowReader>>> {
        async move {
            let count = keys.len().to_string();
            log_event_with_fields(
                Event::JoinSubqueryIssued,
                &[("table", subquery.foreign_path.as_str()), ("keys", count.as_str())],
            );
            let wanted: HashSet<Vec<Value>> = keys.into_iter().collect();
            let mut rows = Vec::new();
            for range in &self.ranges {
                for row in self.table.rows_in(range) {
                    if wanted.contains(&self.key_of(row.values())?) {
                        rows.push(buffer.capture(row.clone())?);
                    }
                }
            }
            Ok(Box::new(MemoryReader::new(rows)) as Box<dyn RowReader>)
        }
        .boxed()
    }
}
