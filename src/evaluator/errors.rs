//! Evaluation error types
//!
//! Error codes:
//! - QL_COMPARISON_ERROR (ERROR)
//! - QL_NULL_GROUP_KEY (ERROR)
//! - QL_CAST_ERROR (ERROR)
//! - QL_UDF_EXECUTION_FAILED (ERROR)
//! - QL_ROW_LIMIT_EXCEEDED (ERROR)
//! - QL_JOIN_KEY_MISMATCH (ERROR)
//! - QL_MEMORY_LIMIT_EXCEEDED (ERROR)
//! - QL_EVALUATION_FAILED (ERROR)
//!
//! Every evaluation error is terminal for the pipeline that raised it:
//! partial output is discarded and nothing is retried.

use std::fmt;

use crate::functions::FunctionError;
use crate::value::CompareError;

/// Severity levels for evaluation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The query failed; the process is healthy
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Evaluation error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationErrorCode {
    /// Ordering or comparison involving NaN or incomparable values
    Comparison,
    /// Null group key together with WITH TOTALS
    NullGroupKey,
    /// Explicit cast of a malformed or out-of-range value
    Cast,
    /// User-defined function failed to load or trapped
    UdfExecution,
    /// Input or output row budget exceeded
    RowLimitExceeded,
    /// Foreign rows do not match the join key layout
    JoinKeyMismatch,
    /// Memory budget exceeded
    MemoryLimitExceeded,
    /// Any other runtime failure
    EvaluationFailed,
}

impl EvaluationErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            EvaluationErrorCode::Comparison => "QL_COMPARISON_ERROR",
            EvaluationErrorCode::NullGroupKey => "QL_NULL_GROUP_KEY",
            EvaluationErrorCode::Cast => "QL_CAST_ERROR",
            EvaluationErrorCode::UdfExecution => "QL_UDF_EXECUTION_FAILED",
            EvaluationErrorCode::RowLimitExceeded => "QL_ROW_LIMIT_EXCEEDED",
            EvaluationErrorCode::JoinKeyMismatch => "QL_JOIN_KEY_MISMATCH",
            EvaluationErrorCode::MemoryLimitExceeded => "QL_MEMORY_LIMIT_EXCEEDED",
            EvaluationErrorCode::EvaluationFailed => "QL_EVALUATION_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for EvaluationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Evaluation error with context
#[derive(Debug, Clone)]
pub struct EvaluationError {
    code: EvaluationErrorCode,
    message: String,
}

impl EvaluationError {
    fn new(code: EvaluationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a comparison error
    pub fn comparison(reason: impl Into<String>) -> Self {
        Self::new(EvaluationErrorCode::Comparison, reason)
    }

    /// Create a null group key error
    pub fn null_group_key() -> Self {
        Self::new(
            EvaluationErrorCode::NullGroupKey,
            "Null values are forbidden in group key when WITH TOTALS is used",
        )
    }

    /// Create a cast error
    pub fn cast(reason: impl Into<String>) -> Self {
        Self::new(EvaluationErrorCode::Cast, reason)
    }

    /// Create a UDF execution error
    pub fn udf_execution(function: &str, reason: impl Into<String>) -> Self {
        Self::new(
            EvaluationErrorCode::UdfExecution,
            format!("Error invoking user-defined function \"{}\": {}", function, reason.into()),
        )
    }

    /// Create an input row limit error
    pub fn input_row_limit(limit: u64) -> Self {
        Self::new(
            EvaluationErrorCode::RowLimitExceeded,
            format!("Input row limit {} exceeded", limit),
        )
    }

    /// Create an output row limit error
    pub fn output_row_limit(limit: u64) -> Self {
        Self::new(
            EvaluationErrorCode::RowLimitExceeded,
            format!("Output row limit {} exceeded", limit),
        )
    }

    /// Create a join key mismatch error
    pub fn join_key_mismatch(reason: impl Into<String>) -> Self {
        Self::new(EvaluationErrorCode::JoinKeyMismatch, reason)
    }

    /// Create a memory limit error
    pub fn memory_limit(limit: usize, requested: usize) -> Self {
        Self::new(
            EvaluationErrorCode::MemoryLimitExceeded,
            format!(
                "Memory limit {} bytes exceeded while allocating {} bytes",
                limit, requested
            ),
        )
    }

    /// Create a generic evaluation failure
    pub fn evaluation_failed(reason: impl Into<String>) -> Self {
        Self::new(EvaluationErrorCode::EvaluationFailed, reason)
    }

    /// Returns the error code
    pub fn code(&self) -> EvaluationErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for EvaluationError {}

impl From<CompareError> for EvaluationError {
    fn from(e: CompareError) -> Self {
        EvaluationError::comparison(e.to_string())
    }
}

impl From<FunctionError> for EvaluationError {
    fn from(e: FunctionError) -> Self {
        match e {
            FunctionError::Cast(reason) => EvaluationError::cast(reason),
            FunctionError::UdfExecution { function, reason } => {
                EvaluationError::udf_execution(&function, reason)
            }
            FunctionError::Comparison(inner) => inner.into(),
            other => EvaluationError::evaluation_failed(other.to_string()),
        }
    }
}

/// Result type for evaluation
pub type EvaluationResult<T> = Result<T, EvaluationError>;
