//! Row sorting for ORDER BY
//!
//! Sort keys are computed once per row. The sort is stable: rows with
//! equal keys keep their input order. NaN in a sort key fails the query.

use std::cmp::Ordering;

use super::compiler::eval_all;
use super::errors::{EvaluationError, EvaluationResult};
use super::program::CompiledOrderItem;
use crate::rows::Row;
use crate::value::Value;

/// Sorts rows by compiled order items
pub struct RowSorter;

impl RowSorter {
    pub fn sort(rows: Vec<Row>, items: &[CompiledOrderItem]) -> EvaluationResult<Vec<Row>> {
        if items.is_empty() {
            return Ok(rows);
        }
        let exprs: Vec<_> = items.iter().map(|item| item.expr.clone()).collect();
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = eval_all(&exprs, row.values())?;
            if key.iter().any(Value::is_nan) {
                return Err(EvaluationError::comparison("Comparison with NaN"));
            }
            keyed.push((key, row));
        }

        keyed.sort_by(|(a, _), (b, _)| Self::compare_keys(a, b, items));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    /// Nulls sort first; numerics compare by value across types
    fn compare_keys(a: &[Value], b: &[Value], items: &[CompiledOrderItem]) -> Ordering {
        for ((left, right), item) in a.iter().zip(b).zip(items) {
            let ordering = left.widened_cmp(right);
            let ordering = if item.descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
