//! # Aggregate functions
//!
//! Every aggregate is an accumulator with `update`, `merge` and `finalize`.
//! Merge is commutative and associative so partial states from different
//! groups or fragments may be combined in any order. Null inputs are skipped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::errors::{FunctionError, FunctionResult};
use crate::value::{Value, ValueType};

/// Aggregate whose accumulator is a single value.
///
/// Implemented by aggregate UDFs and by natively registered aggregates.
pub trait StateAggregate: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self) -> FunctionResult<Value>;
    fn update(&self, state: Value, input: &Value) -> FunctionResult<Value>;
    fn merge(&self, left: Value, right: &Value) -> FunctionResult<Value>;
    fn finalize(&self, state: &Value) -> FunctionResult<Value>;
}

/// Built-in aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Sum,
    Min,
    Max,
    Avg,
    First,
    Cardinality,
}

impl AggregateKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Avg => "avg",
            AggregateKind::First => "first",
            AggregateKind::Cardinality => "cardinality",
        }
    }

    /// Type of the intermediate state reported in plans
    pub fn state_type(&self, argument: ValueType) -> ValueType {
        match self {
            AggregateKind::Avg | AggregateKind::Cardinality => ValueType::Any,
            _ => argument,
        }
    }
}

#[derive(Clone)]
pub enum AggregateImpl {
    Builtin(AggregateKind),
    Custom(Arc<dyn StateAggregate>),
}

impl fmt::Debug for AggregateImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateImpl::Builtin(kind) => write!(f, "Builtin({})", kind.name()),
            AggregateImpl::Custom(custom) => write!(f, "Custom({})", custom.name()),
        }
    }
}

impl AggregateImpl {
    /// Fresh accumulator
    pub fn create_state(&self) -> FunctionResult<AggregateState> {
        Ok(match self {
            AggregateImpl::Builtin(kind) => match kind {
                AggregateKind::Sum => AggregateState::Sum(None),
                AggregateKind::Min => AggregateState::Min(None),
                AggregateKind::Max => AggregateState::Max(None),
                AggregateKind::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
                AggregateKind::First => AggregateState::First(None),
                AggregateKind::Cardinality => AggregateState::Cardinality(HashSet::new()),
            },
            AggregateImpl::Custom(custom) => AggregateState::Custom {
                state: custom.init()?,
                function: custom.clone(),
            },
        })
    }
}

/// Per-group accumulator
pub enum AggregateState {
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: u64 },
    First(Option<Value>),
    Cardinality(HashSet<Value>),
    Custom {
        function: Arc<dyn StateAggregate>,
        state: Value,
    },
}

impl fmt::Debug for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateState::Sum(v) => write!(f, "Sum({:?})", v),
            AggregateState::Min(v) => write!(f, "Min({:?})", v),
            AggregateState::Max(v) => write!(f, "Max({:?})", v),
            AggregateState::Avg { sum, count } => write!(f, "Avg({}, {})", sum, count),
            AggregateState::First(v) => write!(f, "First({:?})", v),
            AggregateState::Cardinality(set) => write!(f, "Cardinality({})", set.len()),
            AggregateState::Custom { function, state } => {
                write!(f, "Custom({}, {:?})", function.name(), state)
            }
        }
    }
}

impl AggregateState {
    pub fn update(&mut self, input: &Value) -> FunctionResult<()> {
        if input.is_null() {
            return Ok(());
        }
        match self {
            AggregateState::Sum(acc) => {
                *acc = Some(match acc.take() {
                    None => input.clone(),
                    Some(current) => add_values(&current, input)?,
                });
            }
            AggregateState::Min(acc) => keep_extreme(acc, input, std::cmp::Ordering::Less)?,
            AggregateState::Max(acc) => keep_extreme(acc, input, std::cmp::Ordering::Greater)?,
            AggregateState::Avg { sum, count } => {
                let value = input.as_f64().ok_or_else(|| {
                    FunctionError::invalid_argument("avg", format!("{} is not numeric", input))
                })?;
                *sum += value;
                *count += 1;
            }
            AggregateState::First(acc) => {
                if acc.is_none() {
                    *acc = Some(input.clone());
                }
            }
            AggregateState::Cardinality(set) => {
                set.insert(input.clone());
            }
            AggregateState::Custom { function, state } => {
                let current = std::mem::replace(state, Value::Null);
                *state = function.update(current, input)?;
            }
        }
        Ok(())
    }

    /// Folds `other` into `self`; both must come from the same aggregate
    pub fn merge(&mut self, other: &AggregateState) -> FunctionResult<()> {
        match (self, other) {
            (AggregateState::Sum(acc), AggregateState::Sum(Some(value))) => {
                *acc = Some(match acc.take() {
                    None => value.clone(),
                    Some(current) => add_values(&current, value)?,
                });
            }
            (AggregateState::Min(acc), AggregateState::Min(Some(value))) => {
                keep_extreme(acc, value, std::cmp::Ordering::Less)?
            }
            (AggregateState::Max(acc), AggregateState::Max(Some(value))) => {
                keep_extreme(acc, value, std::cmp::Ordering::Greater)?
            }
            (
                AggregateState::Avg { sum, count },
                AggregateState::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (AggregateState::First(acc), AggregateState::First(Some(value))) => {
                if acc.is_none() {
                    *acc = Some(value.clone());
                }
            }
            (AggregateState::Cardinality(set), AggregateState::Cardinality(other_set)) => {
                set.extend(other_set.iter().cloned());
            }
            (AggregateState::Custom { function, state }, AggregateState::Custom { state: other_state, .. }) => {
                let current = std::mem::replace(state, Value::Null);
                *state = function.merge(current, other_state)?;
            }
            (AggregateState::Sum(None), _)
            | (AggregateState::Min(None), _)
            | (AggregateState::Max(None), _)
            | (AggregateState::First(None), _) => {}
            (AggregateState::Sum(_), AggregateState::Sum(None))
            | (AggregateState::Min(_), AggregateState::Min(None))
            | (AggregateState::Max(_), AggregateState::Max(None))
            | (AggregateState::First(_), AggregateState::First(None)) => {}
            (left, right) => {
                return Err(FunctionError::invalid_argument(
                    "merge",
                    format!("Cannot merge {:?} into {:?}", right, left),
                ))
            }
        }
        Ok(())
    }

    pub fn finalize(&self) -> FunctionResult<Value> {
        Ok(match self {
            AggregateState::Sum(acc)
            | AggregateState::Min(acc)
            | AggregateState::Max(acc)
            | AggregateState::First(acc) => acc.clone().unwrap_or(Value::Null),
            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Double(*sum / *count as f64)
                }
            }
            AggregateState::Cardinality(set) => Value::Uint64(set.len() as u64),
            AggregateState::Custom { function, state } => function.finalize(state)?,
        })
    }
}

fn add_values(left: &Value, right: &Value) -> FunctionResult<Value> {
    match (left, right) {
        (Value::Int64(a), Value::Int64(b)) => Ok(Value::Int64(a.wrapping_add(*b))),
        (Value::Uint64(a), Value::Uint64(b)) => Ok(Value::Uint64(a.wrapping_add(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        _ => Err(FunctionError::invalid_argument(
            "sum",
            format!("Cannot add {} and {}", left.value_type(), right.value_type()),
        )),
    }
}

fn keep_extreme(acc: &mut Option<Value>, input: &Value, wanted: std::cmp::Ordering) -> FunctionResult<()> {
    let replace = match acc {
        None => true,
        Some(current) => input.compare(current)? == wanted,
    };
    if replace {
        *acc = Some(input.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kind: AggregateKind, inputs: &[Value]) -> Value {
        let mut state = AggregateImpl::Builtin(kind).create_state().unwrap();
        for input in inputs {
            state.update(input).unwrap();
        }
        state.finalize().unwrap()
    }

    #[test]
    fn test_builtin_aggregates() {
        let inputs = [Value::Int64(3), Value::Null, Value::Int64(7), Value::Int64(3)];
        assert_eq!(run(AggregateKind::Sum, &inputs), Value::Int64(13));
        assert_eq!(run(AggregateKind::Min, &inputs), Value::Int64(3));
        assert_eq!(run(AggregateKind::Max, &inputs), Value::Int64(7));
        assert_eq!(run(AggregateKind::First, &inputs), Value::Int64(3));
        assert_eq!(run(AggregateKind::Cardinality, &inputs), Value::Uint64(2));
        assert_eq!(
            run(AggregateKind::Avg, &inputs),
            Value::Double(13.0 / 3.0)
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(run(AggregateKind::Sum, &[Value::Null]), Value::Null);
        assert_eq!(run(AggregateKind::Avg, &[]), Value::Null);
        assert_eq!(run(AggregateKind::Cardinality, &[]), Value::Uint64(0));
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let all: Vec<Value> = (1..=10).map(Value::Int64).collect();
        for kind in [
            AggregateKind::Sum,
            AggregateKind::Min,
            AggregateKind::Max,
            AggregateKind::Avg,
            AggregateKind::Cardinality,
        ] {
            let imp = AggregateImpl::Builtin(kind);
            let mut left = imp.create_state().unwrap();
            let mut right = imp.create_state().unwrap();
            for value in &all[..4] {
                left.update(value).unwrap();
            }
            for value in &all[4..] {
                right.update(value).unwrap();
            }
            left.merge(&right).unwrap();
            assert_eq!(left.finalize().unwrap(), run(kind, &all), "{}", kind.name());
        }
    }

    #[test]
    fn test_merge_into_empty() {
        let imp = AggregateImpl::Builtin(AggregateKind::Max);
        let mut empty = imp.create_state().unwrap();
        let mut full = imp.create_state().unwrap();
        full.update(&Value::Double(2.5)).unwrap();
        empty.merge(&full).unwrap();
        assert_eq!(empty.finalize().unwrap(), Value::Double(2.5));
    }

    #[test]
    fn test_min_with_nan_fails() {
        let mut state = AggregateImpl::Builtin(AggregateKind::Min).create_state().unwrap();
        state.update(&Value::Double(1.0)).unwrap();
        assert!(matches!(
            state.update(&Value::Double(f64::NAN)),
            Err(FunctionError::Comparison(_))
        ));
    }
}
