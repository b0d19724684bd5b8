//! Engine
//!
//! Runs queries end to end over tables held in memory. Each pruned key
//! range becomes one fragment scan on a bounded worker pool; join clauses
//! are served by lookups into the foreign table's pruned ranges.

mod catalog;
#[allow(clippy::module_inception)]
mod engine;
mod fragments;
mod lookup;

pub use catalog::{Catalog, MemoryTable};
pub use engine::{Engine, JoinPlan, PrunePlan, QueryOutput, QueryRequest};
pub use fragments::{FragmentScan, FragmentSettings};
pub use lookup::CatalogLookup;
