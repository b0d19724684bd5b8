//! Compiled query program
//!
//! One closure per pipeline stage, resolved against the row layout that
//! stage sees:
//!
//! - scan rows: primary schema columns
//! - joined rows: primary columns, then each join's appended columns in
//!   canonical join order
//! - grouped rows: group items, then aggregate items

use std::collections::BTreeSet;

use super::compiler::{compile_all, compile_expr, CompiledExpr, Layout};
use super::errors::{EvaluationError, EvaluationResult};
use super::fingerprint::{canonical_join_order, fingerprint};
use crate::functions::{AggregateImpl, FunctionRegistry};
use crate::parser::TotalsMode;
use crate::planner::{Query, TypedExpr};
use crate::value::ValueType;

pub struct CompiledJoin {
    /// Self side of every equation, over the joined row built so far
    pub self_keys: Vec<CompiledExpr>,
    /// Foreign side of every equation, over a foreign schema row
    pub foreign_keys: Vec<CompiledExpr>,
    pub foreign_key_types: Vec<ValueType>,
    pub foreign_width: usize,
    /// Foreign positions appended to the joined row
    pub appended: Vec<usize>,
    /// Residual ON predicate over the joined row including this clause
    pub predicate: Option<CompiledExpr>,
    pub is_left: bool,
}

pub struct CompiledAggregate {
    pub name: String,
    pub argument: CompiledExpr,
    pub implementation: AggregateImpl,
}

pub struct CompiledGroup {
    pub keys: Vec<CompiledExpr>,
    pub aggregates: Vec<CompiledAggregate>,
    pub totals_mode: TotalsMode,
}

pub struct CompiledOrderItem {
    pub expr: CompiledExpr,
    pub descending: bool,
}

/// Executable form of a prepared query
pub struct CompiledQuery {
    pub fingerprint: String,
    /// WHERE conjuncts over primary columns only, applied before joins
    pub prefilter: Option<CompiledExpr>,
    pub joins: Vec<CompiledJoin>,
    /// WHERE conjuncts reading joined columns
    pub postfilter: Option<CompiledExpr>,
    pub group: Option<CompiledGroup>,
    pub having: Option<CompiledExpr>,
    pub order: Vec<CompiledOrderItem>,
    pub projection: Vec<CompiledExpr>,
}

impl CompiledQuery {
    pub fn compile(query: &Query, registry: &FunctionRegistry) -> EvaluationResult<Self> {
        let mut layout = Layout::new(query.self_columns.iter().map(|c| c.name.clone()));
        let primary: BTreeSet<String> = query.self_columns.iter().map(|c| c.name.clone()).collect();

        let (mut early, mut late) = (Vec::new(), Vec::new());
        if let Some(predicate) = &query.where_clause {
            for conjunct in predicate.conjuncts() {
                if conjunct.references().is_subset(&primary) {
                    early.push(conjunct.clone());
                } else {
                    late.push(conjunct.clone());
                }
            }
        }
        let prefilter = compile_conjunction(early, &layout, registry)?;

        let mut joins = Vec::with_capacity(query.joins.len());
        for index in canonical_join_order(query) {
            let clause = &query.joins[index];
            let foreign_layout = Layout::new(clause.foreign_columns.iter().map(|c| c.name.clone()));
            let (self_exprs, foreign_exprs): (Vec<TypedExpr>, Vec<TypedExpr>) =
                clause.equations.iter().cloned().unzip();
            let self_keys = compile_all(&self_exprs, &layout, registry)?;
            let foreign_keys = compile_all(&foreign_exprs, &foreign_layout, registry)?;
            for column in clause.appended_names() {
                layout.push(column.name.clone());
            }
            let predicate = match &clause.predicate {
                Some(predicate) => Some(compile_expr(predicate, &layout, registry)?),
                None => None,
            };
            joins.push(CompiledJoin {
                self_keys,
                foreign_keys,
                foreign_key_types: foreign_exprs.iter().map(|e| e.ty).collect(),
                foreign_width: clause.foreign_schema.len(),
                appended: clause.appended.clone(),
                predicate,
                is_left: clause.is_left(),
            });
        }
        let postfilter = compile_conjunction(late, &layout, registry)?;

        let group = match &query.group {
            Some(group) => {
                let keys: Vec<TypedExpr> = group.group_items.iter().map(|i| i.expr.clone()).collect();
                let keys = compile_all(&keys, &layout, registry)?;
                let aggregates = group
                    .aggregate_items
                    .iter()
                    .map(|item| {
                        let function = registry.aggregate(&item.function).ok_or_else(|| {
                            EvaluationError::evaluation_failed(format!("Undefined aggregate \"{}\"", item.function))
                        })?;
                        Ok(CompiledAggregate {
                            name: item.name.clone(),
                            argument: compile_expr(&item.argument, &layout, registry)?,
                            implementation: function.implementation.clone(),
                        })
                    })
                    .collect::<EvaluationResult<Vec<_>>>()?;
                layout = Layout::new(
                    group
                        .group_items
                        .iter()
                        .map(|i| i.name.clone())
                        .chain(group.aggregate_items.iter().map(|i| i.name.clone())),
                );
                Some(CompiledGroup {
                    keys,
                    aggregates,
                    totals_mode: group.totals_mode,
                })
            }
            None => None,
        };

        let having = match &query.having {
            Some(having) => Some(compile_expr(having, &layout, registry)?),
            None => None,
        };
        let order = match &query.order {
            Some(order) => order
                .items
                .iter()
                .map(|item| {
                    Ok(CompiledOrderItem {
                        expr: compile_expr(&item.expr, &layout, registry)?,
                        descending: item.descending,
                    })
                })
                .collect::<EvaluationResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        let projection: Vec<TypedExpr> = query.projection.iter().map(|i| i.expr.clone()).collect();
        let projection = compile_all(&projection, &layout, registry)?;

        Ok(Self {
            fingerprint: fingerprint(query),
            prefilter,
            joins,
            postfilter,
            group,
            having,
            order,
            projection,
        })
    }
}

fn compile_conjunction(
    conjuncts: Vec<TypedExpr>,
    layout: &Layout,
    registry: &FunctionRegistry,
) -> EvaluationResult<Option<CompiledExpr>> {
    match TypedExpr::and_all(conjuncts) {
        Some(predicate) => Ok(Some(compile_expr(&predicate, layout, registry)?)),
        None => Ok(None),
    }
}
