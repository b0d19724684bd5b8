//! Query evaluator
//!
//! Compiles a prepared query into closures and streams rows through them.
//!
//! # Pipeline
//!
//! 1. Read a batch from the scan reader
//! 2. Apply WHERE conjuncts over primary columns
//! 3. Run join clauses in canonical order, one subquery per join batch
//! 4. Apply the remaining WHERE conjuncts
//! 5. Group and aggregate, or buffer for ORDER BY, or stream
//! 6. HAVING, sort, OFFSET and LIMIT
//! 7. Project and write
//!
//! Compiled programs are cached by structural fingerprint.

mod cache;
mod compiler;
mod errors;
mod evaluator;
mod filters;
mod fingerprint;
mod grouping;
mod join;
mod program;
mod sorter;
mod statistics;

pub use cache::CompiledQueryCache;
pub use compiler::{compile_expr, CompiledExpr, Layout};
pub use errors::{EvaluationError, EvaluationErrorCode, EvaluationResult, Severity};
pub use evaluator::Evaluator;
pub use filters::RowFilter;
pub use fingerprint::{canonical_join_order, fingerprint};
pub use grouping::GroupAccumulator;
pub use join::{JoinInput, JoinSubquery, JoinSubqueryEvaluator};
pub use program::{CompiledGroup, CompiledJoin, CompiledQuery};
pub use sorter::RowSorter;
pub use statistics::QueryStatistics;
