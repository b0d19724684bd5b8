//! shardql - query core for key-sorted, sharded tables
//!
//! Turns a SQL-like query into a plan over data splits, prunes the key
//! ranges each split must read and evaluates the plan as a streaming,
//! row-batched pipeline.
//!
//! Stages: `parser` → `planner` (prepare) → `coordinator` (prune, join
//! strategy) → `evaluator`. `engine` runs them over in-memory tables.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod observability;
pub mod parser;
pub mod planner;
pub mod rows;
pub mod schema;
pub mod value;

pub use config::{ConfigError, EngineConfig, QueryOptions};
pub use engine::{Catalog, Engine, QueryOutput, QueryRequest};
pub use error::{QueryError, QueryResult};
