//! Key range inference for one alternative of the predicate
//!
//! Key columns are walked in order while every prefix is fixed:
//! - point constraints enumerate values
//! - a computed column is evaluated once its references have points,
//!   which fixes those references for the rest of the walk
//! - a `x % N` column with an unconstrained argument is enumerated over
//!   its finite domain when a later key column is constrained
//! - an interval closes the range
//! - anything else ends the prefix

use std::collections::HashMap;

use super::column_evaluator::{ColumnEvaluators, ComputedColumn};
use super::constraints::{Bound, Conjunction, Constraint};
use crate::evaluator::EvaluationResult;
use crate::rows::{Row, RowBuffer};
use crate::schema::{Key, KeyPart, KeyRange};
use crate::value::Value;

#[derive(Debug, Clone, Default)]
struct Prefix {
    key: Vec<Value>,
    /// Values fixed for later columns by evaluating a computed column
    fixed: HashMap<usize, Value>,
}

impl Prefix {
    fn key(&self) -> Key {
        Key::from_values(self.key.iter().cloned())
    }

    fn lower(&self) -> Key {
        if self.key.is_empty() {
            Key::min()
        } else {
            self.key()
        }
    }

    /// `[prefix, prefix + Max)`
    fn range(&self) -> KeyRange {
        KeyRange::new(self.lower(), self.key().with(KeyPart::Max))
    }

    fn extended(&self, value: Value) -> Prefix {
        let mut next = self.clone();
        next.key.push(value);
        next
    }
}

/// Candidate values of one key column for one prefix
enum Step {
    Values(Vec<Prefix>),
    Interval(Constraint),
    Stop,
    /// More values than the expansion limit allows
    Overflow,
}

pub struct RangeInference<'a> {
    pub key_columns: usize,
    pub evaluators: &'a ColumnEvaluators,
    pub limit: usize,
}

impl RangeInference<'_> {
    /// Ranges covering every key the conjunction admits
    pub fn infer(&self, conjunction: &Conjunction, buffer: &mut RowBuffer) -> EvaluationResult<Vec<KeyRange>> {
        let mut prefixes = vec![Prefix::default()];
        for column in 0..self.key_columns {
            let mut next = Vec::new();
            let mut interval = None;
            let mut stopped = false;
            let mut overflow = false;
            for prefix in &prefixes {
                match self.step(column, prefix, conjunction, buffer)? {
                    Step::Values(values) => next.extend(values),
                    Step::Interval(constraint) => interval = Some(constraint),
                    Step::Stop => stopped = true,
                    Step::Overflow => overflow = true,
                }
                if overflow || next.len() > self.limit {
                    overflow = true;
                    break;
                }
            }

            if let Some(Constraint::Interval { lower, upper }) = interval {
                return Ok(prefixes.iter().map(|p| close(p, lower.as_ref(), upper.as_ref())).collect());
            }
            if stopped {
                return Ok(prefixes.iter().map(Prefix::range).collect());
            }
            if overflow {
                if column == 0 {
                    return Ok(vec![KeyRange::universal()]);
                }
                return Ok(self.collapse(column, &prefixes, conjunction));
            }
            if next.is_empty() {
                return Ok(Vec::new());
            }
            prefixes = next;
        }
        Ok(prefixes.iter().map(Prefix::range).collect())
    }

    fn step(
        &self,
        column: usize,
        prefix: &Prefix,
        conjunction: &Conjunction,
        buffer: &mut RowBuffer,
    ) -> EvaluationResult<Step> {
        if let Some(value) = prefix.fixed.get(&column) {
            let value = value.clone();
            return Ok(match conjunction.get(&column) {
                Some(constraint) if constraint.intersect(&Constraint::Points(vec![value.clone()])).is_none() => {
                    Step::Values(Vec::new())
                }
                _ => Step::Values(vec![prefix.extended(value)]),
            });
        }
        if let Some(computed) = self.evaluators.get(column) {
            return self.computed_step(computed, prefix, conjunction, buffer);
        }
        Ok(match conjunction.get(&column) {
            Some(Constraint::Points(points)) => {
                Step::Values(points.iter().map(|v| prefix.extended(v.clone())).collect())
            }
            Some(interval) => Step::Interval(interval.clone()),
            None => Step::Stop,
        })
    }

    fn computed_step(
        &self,
        computed: &ComputedColumn,
        prefix: &Prefix,
        conjunction: &Conjunction,
        buffer: &mut RowBuffer,
    ) -> EvaluationResult<Step> {
        let pending: Vec<usize> = computed
            .references
            .iter()
            .copied()
            .filter(|r| !prefix.fixed.contains_key(r) && *r != computed.index)
            .collect();
        let mut choices: Vec<&[Value]> = Vec::with_capacity(pending.len());
        for reference in &pending {
            match conjunction.get(reference) {
                Some(Constraint::Points(points)) => choices.push(points),
                _ => {
                    return Ok(match conjunction.get(&computed.index) {
                        Some(Constraint::Points(points)) => {
                            Step::Values(points.iter().map(|v| prefix.extended(v.clone())).collect())
                        }
                        Some(interval) => Step::Interval(interval.clone()),
                        None => self.modulo_step(computed, prefix, conjunction),
                    })
                }
            }
        }

        let total = choices.iter().fold(1usize, |n, c| n.saturating_mul(c.len()));
        if total > self.limit {
            return Ok(Step::Overflow);
        }
        let own = conjunction.get(&computed.index);
        let mut values = Vec::with_capacity(total);
        for combination in cartesian(&choices) {
            let mut fixed = prefix.fixed.clone();
            for (reference, value) in pending.iter().zip(combination) {
                fixed.insert(*reference, value);
            }
            let mut row = vec![Value::Null; self.evaluators.width()];
            for (index, value) in &fixed {
                row[*index] = value.clone();
            }
            let row = buffer.capture(Row::new(row))?;
            let Ok(value) = computed.evaluate(row.values()) else {
                return Ok(Step::Stop);
            };
            if own.is_some_and(|c| c.intersect(&Constraint::Points(vec![value.clone()])).is_none()) {
                continue;
            }
            let mut next = prefix.extended(value);
            next.fixed = fixed;
            values.push(next);
        }
        Ok(Step::Values(values))
    }

    fn modulo_step(&self, computed: &ComputedColumn, prefix: &Prefix, conjunction: &Conjunction) -> Step {
        let later_constrained = conjunction.keys().any(|c| *c > computed.index && *c < self.key_columns);
        if !later_constrained {
            return Step::Stop;
        }
        match computed.modulo_domain() {
            Some(domain) => Step::Values(domain.into_iter().map(|v| prefix.extended(v)).collect()),
            None => Step::Stop,
        }
    }

    /// Expansion would exceed the limit at `column`: plain point columns
    /// collapse to their hull, other columns end the prefix
    fn collapse(&self, column: usize, prefixes: &[Prefix], conjunction: &Conjunction) -> Vec<KeyRange> {
        let points = match conjunction.get(&column) {
            Some(Constraint::Points(points)) if self.evaluators.get(column).is_none() => Some(points),
            _ => None,
        };
        prefixes
            .iter()
            .map(|prefix| match (points, prefix.fixed.contains_key(&column)) {
                (Some(points), false) if !points.is_empty() => {
                    let lower = points.first().map(|v| Bound {
                        value: v.clone(),
                        inclusive: true,
                    });
                    let upper = points.last().map(|v| Bound {
                        value: v.clone(),
                        inclusive: true,
                    });
                    close(prefix, lower.as_ref(), upper.as_ref())
                }
                _ => prefix.range(),
            })
            .collect()
    }
}

/// Range of a prefix followed by an interval on the next column
fn close(prefix: &Prefix, lower: Option<&Bound>, upper: Option<&Bound>) -> KeyRange {
    let key = prefix.key();
    let lower = match lower {
        None => prefix.lower(),
        Some(bound) if bound.inclusive => key.with(KeyPart::Value(bound.value.clone())),
        Some(bound) => key.with(KeyPart::Value(bound.value.clone())).with(KeyPart::Max),
    };
    let upper = match upper {
        None => key.with(KeyPart::Max),
        Some(bound) if bound.inclusive => key.with(KeyPart::Value(bound.value.clone())).with(KeyPart::Max),
        Some(bound) => key.with(KeyPart::Value(bound.value.clone())),
    };
    KeyRange::new(lower, upper)
}

/// Every combination picking one value per choice list
fn cartesian(choices: &[&[Value]]) -> Vec<Vec<Value>> {
    choices.iter().fold(vec![Vec::new()], |combinations, choice| {
        combinations
            .iter()
            .flat_map(|combination| {
                choice.iter().map(move |value| {
                    let mut next = combination.clone();
                    next.push(value.clone());
                    next
                })
            })
            .collect()
    })
}
