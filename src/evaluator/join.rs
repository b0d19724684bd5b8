//! Join stage
//!
//! Primary rows arrive in batches. For each batch the distinct self-side
//! keys are sent to the join subquery evaluator, which returns candidate
//! foreign rows. Matching is sort-merge when the strategy asks for it and
//! both sides really are key-sorted, otherwise a hash join. Either way the
//! output keeps primary row order.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use uuid::Uuid;

use super::compiler::{eval_all, is_true};
use super::errors::{EvaluationError, EvaluationResult};
use super::program::CompiledJoin;
use super::statistics::QueryStatistics;
use crate::coordinator::JoinStrategy;
use crate::planner::{JoinClause, TypedExpr};
use crate::rows::{read_all, Row, RowBuffer, RowReader};
use crate::schema::TableSchema;
use crate::value::Value;

/// Foreign side of one join clause, as seen by a subquery evaluator
#[derive(Debug, Clone)]
pub struct JoinSubquery {
    /// Index of the clause in the prepared query
    pub clause_index: usize,
    pub foreign_path: String,
    pub foreign_object_id: Uuid,
    pub foreign_schema: Arc<TableSchema>,
    /// Foreign side of every equation, over foreign schema columns
    pub foreign_keys: Vec<TypedExpr>,
    /// Whether foreign rows must come back sorted by key
    pub ordered: bool,
}

impl JoinSubquery {
    pub fn from_clause(clause_index: usize, clause: &JoinClause, strategy: JoinStrategy) -> Self {
        Self {
            clause_index,
            foreign_path: clause.foreign_path.clone(),
            foreign_object_id: clause.foreign_object_id,
            foreign_schema: clause.foreign_schema.clone(),
            foreign_keys: clause.equations.iter().map(|(_, foreign)| foreign.clone()).collect(),
            ordered: strategy == JoinStrategy::SortMerge,
        }
    }
}

/// Fetches foreign rows for a set of join keys
///
/// Returned rows have the full foreign schema width. Returning rows whose
/// keys were not asked for is allowed; they never match.
pub trait JoinSubqueryEvaluator: Send + Sync {
    fn evaluate<'a>(
        &'a self,
        subquery: &'a JoinSubquery,
        keys: Vec<Vec<Value>>,
        buffer: &'a mut RowBuffer,
    ) -> BoxFuture<'a, EvaluationResult<Box<dyn RowReader>>>;
}

/// How one join clause is executed
#[derive(Clone)]
pub struct JoinInput {
    pub strategy: JoinStrategy,
    pub evaluator: Arc<dyn JoinSubqueryEvaluator>,
}

/// Joins one batch of rows against one clause
pub(crate) struct JoinStage<'a> {
    pub join: &'a CompiledJoin,
    pub subquery: JoinSubquery,
    pub input: JoinInput,
    pub rows_per_read: usize,
}

impl JoinStage<'_> {
    pub async fn run(
        &self,
        rows: Vec<Row>,
        buffer: &mut RowBuffer,
        stats: &mut QueryStatistics,
    ) -> EvaluationResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let started = Instant::now();
        let self_keys = rows
            .iter()
            .map(|row| eval_all(&self.join.self_keys, row.values()))
            .collect::<EvaluationResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut keys: Vec<Vec<Value>> = self_keys
            .iter()
            .filter(|key| seen.insert((*key).clone()))
            .cloned()
            .collect();
        if self.subquery.ordered {
            keys.sort_by(|a, b| compare_tuples(a, b));
        }
        stats.add_sync_time(started.elapsed());

        let waited = Instant::now();
        let mut reader = self.input.evaluator.evaluate(&self.subquery, keys, buffer).await?;
        let foreign = read_all(reader.as_mut(), self.rows_per_read).await?;
        stats.add_async_wait(waited.elapsed());
        stats.join_subqueries += 1;

        let started = Instant::now();
        let foreign_keys = self.foreign_keys(&foreign)?;
        let matches = if self.input.strategy == JoinStrategy::SortMerge
            && is_sorted(&self_keys)
            && is_sorted(&foreign_keys)
        {
            merge_match(&self_keys, &foreign_keys)
        } else {
            hash_match(&self_keys, &foreign_keys)
        };
        let joined = self.combine(rows, &foreign, &matches)?;
        stats.add_sync_time(started.elapsed());
        Ok(joined)
    }

    /// Evaluates and validates the key tuple of every foreign row
    fn foreign_keys(&self, foreign: &[Row]) -> EvaluationResult<Vec<Vec<Value>>> {
        foreign
            .iter()
            .map(|row| {
                if row.len() != self.join.foreign_width {
                    return Err(EvaluationError::join_key_mismatch(format!(
                        "Foreign row of \"{}\" has {} columns, expected {}",
                        self.subquery.foreign_path,
                        row.len(),
                        self.join.foreign_width
                    )));
                }
                let key = eval_all(&self.join.foreign_keys, row.values())?;
                for (value, expected) in key.iter().zip(&self.join.foreign_key_types) {
                    if !value.is_null() && value.value_type() != *expected {
                        return Err(EvaluationError::join_key_mismatch(format!(
                            "Foreign key of \"{}\" has type {}, expected {}",
                            self.subquery.foreign_path,
                            value.value_type(),
                            expected
                        )));
                    }
                }
                Ok(key)
            })
            .collect()
    }

    fn combine(&self, rows: Vec<Row>, foreign: &[Row], matches: &[Vec<usize>]) -> EvaluationResult<Vec<Row>> {
        let mut joined = Vec::with_capacity(rows.len());
        for (row, candidates) in rows.into_iter().zip(matches) {
            let mut matched = false;
            for &candidate in candidates {
                let appended: Vec<Value> = self
                    .join
                    .appended
                    .iter()
                    .map(|&index| foreign[candidate][index].clone())
                    .collect();
                let combined = row.clone().concat(&appended);
                if let Some(predicate) = &self.join.predicate {
                    if !is_true(&predicate(combined.values())?) {
                        continue;
                    }
                }
                matched = true;
                joined.push(combined);
            }
            if !matched && self.join.is_left {
                let nulls = vec![Value::Null; self.join.appended.len()];
                joined.push(row.concat(&nulls));
            }
        }
        Ok(joined)
    }
}

/// Lexicographic tuple order; nulls first
fn compare_tuples(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ordering = left.widened_cmp(right);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

fn is_sorted(keys: &[Vec<Value>]) -> bool {
    keys.windows(2).all(|pair| compare_tuples(&pair[0], &pair[1]) != Ordering::Greater)
}

/// Foreign matches per primary row, both sides unsorted
fn hash_match(primary: &[Vec<Value>], foreign: &[Vec<Value>]) -> Vec<Vec<usize>> {
    let mut index: HashMap<&[Value], Vec<usize>> = HashMap::new();
    for (position, key) in foreign.iter().enumerate() {
        index.entry(key.as_slice()).or_default().push(position);
    }
    primary
        .iter()
        .map(|key| index.get(key.as_slice()).cloned().unwrap_or_default())
        .collect()
}

/// Foreign matches per primary row, both sides sorted by key
fn merge_match(primary: &[Vec<Value>], foreign: &[Vec<Value>]) -> Vec<Vec<usize>> {
    let mut matches = Vec::with_capacity(primary.len());
    let mut start = 0;
    for key in primary {
        while start < foreign.len() && compare_tuples(&foreign[start], key) == Ordering::Less {
            start += 1;
        }
        let mut end = start;
        while end < foreign.len() && compare_tuples(&foreign[end], key) == Ordering::Equal {
            end += 1;
        }
        matches.push((start..end).collect());
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryOptions;
    use crate::evaluator::{CompiledExpr, EvaluationErrorCode};
    use crate::rows::{MemoryReader, MemoryTracker};
    use crate::value::ValueType;
    use futures_util::FutureExt;

    struct FixedRows(Vec<Row>);

    impl JoinSubqueryEvaluator for FixedRows {
        fn evaluate<'a>(
            &'a self,
            _subquery: &'a JoinSubquery,
            _keys: Vec<Vec<Value>>,
            _buffer: &'a mut RowBuffer,
        ) -> BoxFuture<'a, EvaluationResult<Box<dyn RowReader>>> {
            let reader: Box<dyn RowReader> = Box::new(MemoryReader::new(self.0.clone()));
            async move { Ok(reader) }.boxed()
        }
    }

    fn column(index: usize) -> CompiledExpr {
        Arc::new(move |row: &[Value]| Ok(row[index].clone()))
    }

    fn join(is_left: bool) -> CompiledJoin {
        CompiledJoin {
            self_keys: vec![column(0)],
            foreign_keys: vec![column(0)],
            foreign_key_types: vec![ValueType::Int64],
            foreign_width: 2,
            appended: vec![1],
            predicate: None,
            is_left,
        }
    }

    fn subquery() -> JoinSubquery {
        JoinSubquery {
            clause_index: 0,
            foreign_path: "//f".into(),
            foreign_object_id: Uuid::new_v4(),
            foreign_schema: Arc::new(TableSchema::new(vec![]).unwrap()),
            foreign_keys: vec![],
            ordered: false,
        }
    }

    fn pair(k: i64, v: &str) -> Row {
        Row::new(vec![Value::Int64(k), Value::from(v)])
    }

    async fn run(join: &CompiledJoin, strategy: JoinStrategy, primary: Vec<Row>, foreign: Vec<Row>) -> EvaluationResult<Vec<Row>> {
        let stage = JoinStage {
            join,
            subquery: subquery(),
            input: JoinInput {
                strategy,
                evaluator: Arc::new(FixedRows(foreign)),
            },
            rows_per_read: QueryOptions::default().rows_per_read,
        };
        let mut buffer = RowBuffer::new(MemoryTracker::new(usize::MAX));
        let mut stats = QueryStatistics::default();
        let rows = stage.run(primary, &mut buffer, &mut stats).await?;
        assert_eq!(stats.join_subqueries, 1);
        Ok(rows)
    }

    fn single(k: i64) -> Row {
        Row::new(vec![Value::Int64(k)])
    }

    #[tokio::test]
    async fn test_inner_join_keeps_primary_order() {
        let join = join(false);
        let rows = run(
            &join,
            JoinStrategy::ForeignLookup,
            vec![single(3), single(1), single(2)],
            vec![pair(1, "a"), pair(3, "c"), pair(3, "cc")],
        )
        .await
        .unwrap();
        let values: Vec<_> = rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(values, vec![Value::from("c"), Value::from("cc"), Value::from("a")]);
    }

    #[tokio::test]
    async fn test_left_join_pads_nulls() {
        let join = join(true);
        let rows = run(&join, JoinStrategy::ForeignLookup, vec![single(1), single(5)], vec![pair(1, "a")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].values(), &[Value::Int64(5), Value::Null]);
    }

    #[tokio::test]
    async fn test_sort_merge_matches_hash() {
        let join = join(false);
        let primary = vec![single(1), single(2), single(2), single(4)];
        let foreign = vec![pair(1, "a"), pair(2, "b"), pair(3, "c"), pair(4, "d")];
        let merged = run(&join, JoinStrategy::SortMerge, primary.clone(), foreign.clone()).await.unwrap();
        let hashed = run(&join, JoinStrategy::ForeignLookup, primary, foreign).await.unwrap();
        assert_eq!(merged, hashed);
        assert_eq!(merged.len(), 4);
    }

    #[tokio::test]
    async fn test_sort_merge_falls_back_on_unsorted_input() {
        let join = join(false);
        let rows = run(
            &join,
            JoinStrategy::SortMerge,
            vec![single(2), single(1)],
            vec![pair(2, "b"), pair(1, "a")],
        )
        .await
        .unwrap();
        assert_eq!(rows[0][1], Value::from("b"));
        assert_eq!(rows[1][1], Value::from("a"));
    }

    #[tokio::test]
    async fn test_residual_predicate() {
        let mut join = join(true);
        join.predicate = Some(Arc::new(|row: &[Value]| Ok(Value::Boolean(row[1] != Value::from("x")))));
        let rows = run(&join, JoinStrategy::ForeignLookup, vec![single(1)], vec![pair(1, "x")])
            .await
            .unwrap();
        assert_eq!(rows[0].values(), &[Value::Int64(1), Value::Null]);
    }

    #[tokio::test]
    async fn test_foreign_row_mismatch() {
        let join = join(false);
        let err = run(&join, JoinStrategy::ForeignLookup, vec![single(1)], vec![single(1)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::JoinKeyMismatch);

        let err = run(
            &join,
            JoinStrategy::ForeignLookup,
            vec![single(1)],
            vec![Row::new(vec![Value::from("1"), Value::from("a")])],
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::JoinKeyMismatch);
    }
}
