//! Predicate filtering
//!
//! Three-valued: a row passes only when the predicate is `true`. NULL and
//! `false` both exclude it; evaluation errors abort.

use super::compiler::{is_true, CompiledExpr};
use super::errors::EvaluationResult;
use crate::rows::Row;

/// Filter over a compiled predicate
pub struct RowFilter<'a> {
    predicate: Option<&'a CompiledExpr>,
}

impl<'a> RowFilter<'a> {
    /// A missing predicate passes every row
    pub fn new(predicate: Option<&'a CompiledExpr>) -> Self {
        Self { predicate }
    }

    pub fn matches(&self, row: &Row) -> EvaluationResult<bool> {
        match self.predicate {
            Some(predicate) => Ok(is_true(&predicate(row.values())?)),
            None => Ok(true),
        }
    }

    /// Keeps matching rows, preserving order
    pub fn apply(&self, rows: Vec<Row>) -> EvaluationResult<Vec<Row>> {
        if self.predicate.is_none() {
            return Ok(rows);
        }
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if self.matches(&row)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }
}
