//! Query preparation subsystem
//!
//! Turns query text into a typed `Query`.
//!
//! # Stages
//!
//! 1. Parse (with placeholder substitution)
//! 2. Fetch the schema of every table through the split provider
//! 3. Resolve columns and aliases, infer types, check aggregate usage
//! 4. Analyse key prefixes: join alignment, disjoint grouping, order reduction
//!
//! Every failure is a `PrepareError` raised before any data is read.

mod bounds;
pub mod errors;
mod explain;
mod expr;
mod keys;
mod namespace;
mod preparer;
mod query;

pub use errors::{PrepareError, PrepareErrorCode, PrepareResult, Severity};
pub use explain::{GroupExplain, JoinExplain, QueryExplain};
pub use expr::{ExprKind, TypedExpr};
pub use keys::computed_references;
pub use preparer::{bind_standalone_expression, prepare, prepare_job_query, SplitProvider};
pub use query::{
    AggregateItem, ColumnMapping, GroupClause, JoinClause, JoinKind, NamedItem, OrderClause, OrderItem, Query,
};
