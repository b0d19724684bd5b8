//! Range pruning and join planning
//!
//! Pruning never touches the splits it is given: it derives new ranges
//! from them. Every returned range lies inside some split, ranges are
//! sorted and do not overlap.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use super::column_evaluator::ColumnEvaluatorCache;
use super::constraints::{ConstraintExtractor, Disjunction};
use super::join_strategy::JoinStrategy;
use super::ranges::RangeInference;
use crate::config::QueryOptions;
use crate::error::{QueryError, QueryResult};
use crate::planner::{JoinClause, Query, TypedExpr};
use crate::rows::RowBuffer;
use crate::schema::{merge_ranges, DataSplit, KeyRange, TableSchema};
use crate::value::ValueType;

pub struct Coordinator<'a> {
    cache: &'a ColumnEvaluatorCache,
    options: &'a QueryOptions,
}

impl<'a> Coordinator<'a> {
    pub fn new(cache: &'a ColumnEvaluatorCache, options: &'a QueryOptions) -> Self {
        Self { cache, options }
    }

    /// Key ranges of the primary table that may hold rows passing WHERE
    pub fn prune(
        &self,
        query: &Query,
        object_id: Uuid,
        splits: &[DataSplit],
        buffer: &mut RowBuffer,
    ) -> QueryResult<Vec<KeyRange>> {
        let resolve = |name: &str| query.self_column(name).map(|c| (c.index, c.ty));
        let alternatives = match &query.where_clause {
            Some(predicate) => ConstraintExtractor::new(&resolve, self.options.range_expansion_limit).extract(predicate),
            None => vec![Default::default()],
        };
        self.ranges(&query.schema, &alternatives, object_id, splits, buffer)
    }

    /// Key ranges of the foreign table of join `join_index` that may hold
    /// matching rows.
    ///
    /// WHERE conjuncts over self columns carry over through plain column
    /// equations. Conjuncts reading only foreign columns are used from the
    /// ON predicate, and from WHERE for inner joins.
    pub fn prune_foreign(
        &self,
        query: &Query,
        join_index: usize,
        splits: &[DataSplit],
        buffer: &mut RowBuffer,
    ) -> QueryResult<Vec<KeyRange>> {
        let clause = query
            .joins
            .get(join_index)
            .ok_or_else(|| QueryError::catalog(format!("Query has no join clause {}", join_index)))?;
        let predicate = TypedExpr::and_all(foreign_conjuncts(query, clause));
        let resolve = |name: &str| -> Option<(usize, ValueType)> { clause.foreign_column(name).map(|c| (c.index, c.ty)) };
        let alternatives = match &predicate {
            Some(predicate) => ConstraintExtractor::new(&resolve, self.options.range_expansion_limit).extract(predicate),
            None => vec![Default::default()],
        };
        self.ranges(
            &clause.foreign_schema,
            &alternatives,
            clause.foreign_object_id,
            splits,
            buffer,
        )
    }

    /// Strategy per join clause, in clause order
    pub fn join_strategies(query: &Query) -> Vec<JoinStrategy> {
        query.joins.iter().map(JoinStrategy::for_clause).collect()
    }

    fn ranges(
        &self,
        schema: &TableSchema,
        alternatives: &Disjunction,
        object_id: Uuid,
        splits: &[DataSplit],
        buffer: &mut RowBuffer,
    ) -> QueryResult<Vec<KeyRange>> {
        let splits: Vec<&DataSplit> = splits.iter().filter(|s| s.object_id == object_id).collect();
        if splits.is_empty() || alternatives.is_empty() {
            return Ok(Vec::new());
        }
        let evaluators = self.cache.get(schema)?;
        let inference = RangeInference {
            key_columns: schema.key_column_count(),
            evaluators: &evaluators,
            limit: self.options.range_expansion_limit.max(1),
        };

        let mut inferred = Vec::new();
        for conjunction in alternatives {
            inferred.extend(inference.infer(conjunction, buffer)?);
        }
        let inferred = merge_ranges(inferred);

        // Pieces stay per split so each one maps to a single fragment
        let mut pruned = Vec::new();
        for split in splits {
            pruned.extend(inferred.iter().filter_map(|range| range.intersect(&split.range)));
        }
        pruned.sort_by(|a, b| a.lower.cmp(&b.lower));
        Ok(pruned)
    }
}

/// Predicate conjuncts restated over the foreign columns of `clause`
fn foreign_conjuncts(query: &Query, clause: &JoinClause) -> Vec<TypedExpr> {
    let renames: HashMap<&str, &str> = clause
        .equations
        .iter()
        .filter_map(|(own, foreign)| Some((own.as_reference()?, foreign.as_reference()?)))
        .collect();
    let foreign_names: BTreeSet<String> = clause.foreign_columns.iter().map(|c| c.name.clone()).collect();
    let is_foreign_only = |expr: &TypedExpr| {
        let references = expr.references();
        !references.is_empty() && references.is_subset(&foreign_names)
    };

    let mut conjuncts = Vec::new();
    if let Some(predicate) = &query.where_clause {
        for conjunct in predicate.conjuncts() {
            if !clause.is_left() && is_foreign_only(conjunct) {
                conjuncts.push(conjunct.clone());
            } else if let Some(renamed) =
                conjunct.rename_references(&|name| renames.get(name).map(|foreign| foreign.to_string()))
            {
                conjuncts.push(renamed);
            }
        }
    }
    if let Some(predicate) = &clause.predicate {
        conjuncts.extend(predicate.conjuncts().into_iter().filter(|c| is_foreign_only(c)).cloned());
    }
    conjuncts
}
