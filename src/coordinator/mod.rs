//! Query coordination
//!
//! Decides which key ranges of each table a prepared query must read and
//! how every join is executed. Nothing here reads table data.
//!
//! - `constraints`: WHERE predicate to per-column constraints in DNF
//! - `ranges`: constraints to key ranges, through computed key columns
//! - `column_evaluator`: compiled computed-column expressions per schema
//! - `join_strategy`: sort-merge or foreign lookup per join clause

mod column_evaluator;
mod constraints;
#[allow(clippy::module_inception)]
mod coordinator;
mod join_strategy;
mod ranges;

pub use column_evaluator::{ColumnEvaluatorCache, ColumnEvaluators, ComputedColumn};
pub use constraints::{Bound, Conjunction, Constraint, ConstraintExtractor, Disjunction, Resolver};
pub use coordinator::Coordinator;
pub use join_strategy::JoinStrategy;
pub use ranges::RangeInference;
