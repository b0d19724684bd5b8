//! Grouping and aggregation
//!
//! One accumulator map keyed by the group-key tuple. Groups keep their
//! first-seen order. With a group limit, new keys beyond the limit are
//! dropped while existing groups keep accumulating. Row totals always
//! cover every input row, including rows of dropped groups.

use std::collections::HashMap;

use super::compiler::{eval_all, is_true, CompiledExpr};
use super::errors::{EvaluationError, EvaluationResult};
use super::program::CompiledGroup;
use crate::functions::AggregateState;
use crate::parser::TotalsMode;
use crate::rows::Row;
use crate::value::Value;

struct Group {
    key: Vec<Value>,
    states: Vec<AggregateState>,
}

pub struct GroupAccumulator<'a> {
    group: &'a CompiledGroup,
    index: HashMap<Vec<Value>, usize>,
    groups: Vec<Group>,
    /// Totals over every input row
    totals: Option<Vec<AggregateState>>,
    /// Rows accumulated into some group or the totals
    contributing_rows: u64,
    group_limit: Option<usize>,
}

impl<'a> GroupAccumulator<'a> {
    pub fn new(group: &'a CompiledGroup, group_limit: Option<usize>) -> EvaluationResult<Self> {
        let totals = match group.totals_mode {
            TotalsMode::None => None,
            _ => Some(Self::fresh_states(group)?),
        };
        Ok(Self {
            group,
            index: HashMap::new(),
            groups: Vec::new(),
            totals,
            contributing_rows: 0,
            group_limit,
        })
    }

    fn fresh_states(group: &CompiledGroup) -> EvaluationResult<Vec<AggregateState>> {
        group
            .aggregates
            .iter()
            .map(|aggregate| Ok(aggregate.implementation.create_state()?))
            .collect()
    }

    /// Accumulates one joined and filtered row
    pub fn add(&mut self, row: &Row) -> EvaluationResult<()> {
        let key = eval_all(&self.group.keys, row.values())?;
        if self.totals.is_some() && key.iter().any(Value::is_null) {
            return Err(EvaluationError::null_group_key());
        }
        let arguments: Vec<Value> = self
            .group
            .aggregates
            .iter()
            .map(|aggregate| (aggregate.argument)(row.values()))
            .collect::<EvaluationResult<_>>()?;

        self.contributing_rows += 1;
        if let Some(totals) = &mut self.totals {
            for (state, argument) in totals.iter_mut().zip(&arguments) {
                state.update(argument)?;
            }
        }

        let position = match self.index.get(&key) {
            Some(position) => Some(*position),
            None if self.group_limit.map_or(true, |limit| self.groups.len() < limit) => {
                let position = self.groups.len();
                self.index.insert(key.clone(), position);
                self.groups.push(Group {
                    key,
                    states: Self::fresh_states(self.group)?,
                });
                Some(position)
            }
            None => None,
        };
        if let Some(position) = position {
            for (state, argument) in self.groups[position].states.iter_mut().zip(&arguments) {
                state.update(argument)?;
            }
        }
        Ok(())
    }

    /// Finalizes groups in first-seen order, applying HAVING.
    ///
    /// Returns the surviving group rows and, under WITH TOTALS, the totals
    /// row with null keys. Totals are produced only when at least one row
    /// was accumulated.
    pub fn finish(self, having: Option<&CompiledExpr>) -> EvaluationResult<(Vec<Row>, Option<Row>)> {
        let key_count = self.group.keys.len();
        let mut rows = Vec::with_capacity(self.groups.len());
        let mut after_having = match self.group.totals_mode {
            TotalsMode::AfterHaving => Some(Self::fresh_states(self.group)?),
            _ => None,
        };

        for group in self.groups {
            let mut values = group.key;
            for state in &group.states {
                values.push(state.finalize()?);
            }
            if let Some(having) = having {
                if !is_true(&having(&values)?) {
                    continue;
                }
            }
            if let Some(totals) = &mut after_having {
                for (total, state) in totals.iter_mut().zip(&group.states) {
                    total.merge(state)?;
                }
            }
            rows.push(Row::new(values));
        }

        let totals = match (self.group.totals_mode, self.contributing_rows) {
            (TotalsMode::None, _) | (_, 0) => None,
            (TotalsMode::AfterHaving, _) => after_having,
            (TotalsMode::BeforeHaving, _) => self.totals,
        };
        let totals_row = match totals {
            Some(states) => {
                let mut values = vec![Value::Null; key_count];
                for state in &states {
                    values.push(state.finalize()?);
                }
                Some(Row::new(values))
            }
            None => None,
        };
        Ok((rows, totals_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::program::CompiledAggregate;
    use crate::evaluator::EvaluationErrorCode;
    use crate::functions::{AggregateImpl, AggregateKind};
    use std::sync::Arc;

    fn column(index: usize) -> CompiledExpr {
        Arc::new(move |row: &[Value]| Ok(row[index].clone()))
    }

    fn sum_by_first(totals_mode: TotalsMode) -> CompiledGroup {
        CompiledGroup {
            keys: vec![column(0)],
            aggregates: vec![CompiledAggregate {
                name: "sum(b)".into(),
                argument: column(1),
                implementation: AggregateImpl::Builtin(AggregateKind::Sum),
            }],
            totals_mode,
        }
    }

    fn row(k: Value, v: i64) -> Row {
        Row::new(vec![k, Value::Int64(v)])
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let group = sum_by_first(TotalsMode::None);
        let mut acc = GroupAccumulator::new(&group, None).unwrap();
        for (k, v) in [(2, 1), (1, 10), (2, 5)] {
            acc.add(&row(Value::Int64(k), v)).unwrap();
        }
        let (rows, totals) = acc.finish(None).unwrap();
        assert_eq!(rows[0].values(), &[Value::Int64(2), Value::Int64(6)]);
        assert_eq!(rows[1].values(), &[Value::Int64(1), Value::Int64(10)]);
        assert!(totals.is_none());
    }

    #[test]
    fn test_totals_cover_dropped_groups() {
        let group = sum_by_first(TotalsMode::BeforeHaving);
        let mut acc = GroupAccumulator::new(&group, Some(1)).unwrap();
        for (k, v) in [(1, 1), (2, 2), (1, 3)] {
            acc.add(&row(Value::Int64(k), v)).unwrap();
        }
        let (rows, totals) = acc.finish(None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], Value::Int64(4));
        assert_eq!(totals.unwrap().values(), &[Value::Null, Value::Int64(6)]);
    }

    #[test]
    fn test_totals_after_having() {
        let having: CompiledExpr = Arc::new(|row: &[Value]| Ok(Value::Boolean(row[1] != Value::Int64(1))));
        let group = sum_by_first(TotalsMode::AfterHaving);
        let mut acc = GroupAccumulator::new(&group, None).unwrap();
        for (k, v) in [(1, 1), (2, 2), (3, 3)] {
            acc.add(&row(Value::Int64(k), v)).unwrap();
        }
        let (rows, totals) = acc.finish(Some(&having)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(totals.unwrap()[1], Value::Int64(5));
    }

    #[test]
    fn test_null_key_with_totals() {
        let group = sum_by_first(TotalsMode::BeforeHaving);
        let mut acc = GroupAccumulator::new(&group, None).unwrap();
        let err = acc.add(&row(Value::Null, 1)).unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::NullGroupKey);

        let group = sum_by_first(TotalsMode::None);
        let mut acc = GroupAccumulator::new(&group, None).unwrap();
        acc.add(&row(Value::Null, 1)).unwrap();
        let (rows, _) = acc.finish(None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Null);
    }

    #[test]
    fn test_no_totals_on_empty_input() {
        let group = sum_by_first(TotalsMode::BeforeHaving);
        let acc = GroupAccumulator::new(&group, None).unwrap();
        let (rows, totals) = acc.finish(None).unwrap();
        assert!(rows.is_empty());
        assert!(totals.is_none());
    }
}
