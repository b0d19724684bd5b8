//! Crate-level error
//!
//! Each layer keeps its own error type; `QueryError` wraps whichever one
//! ended a request so callers handle a single type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::evaluator::EvaluationError;
use crate::functions::FunctionError;
use crate::planner::PrepareError;
use crate::schema::SchemaError;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Prepare(#[from] PrepareError),

    #[error("{0}")]
    Evaluation(#[from] EvaluationError),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Function(#[from] FunctionError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl QueryError {
    pub fn catalog(message: impl Into<String>) -> Self {
        QueryError::Catalog(message.into())
    }

    /// Stable code of the wrapped error
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Prepare(e) => e.code().code(),
            QueryError::Evaluation(e) => e.code().code(),
            QueryError::Schema(e) => e.code().code(),
            QueryError::Function(_) => "QL_FUNCTION_ERROR",
            QueryError::Config(_) => "QL_CONFIG_ERROR",
            QueryError::Catalog(_) => "QL_CATALOG_ERROR",
        }
    }
}
