//! # Function Errors

use thiserror::Error;

use crate::value::CompareError;

/// Result type for function operations
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Function errors
#[derive(Debug, Clone, Error)]
pub enum FunctionError {
    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Function already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid signature for function \"{function}\": {reason}")]
    InvalidSignature { function: String, reason: String },

    #[error("Invalid argument for function \"{function}\": {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("{0}")]
    Cast(String),

    #[error("{0}")]
    Comparison(CompareError),

    #[error("Error evaluating UDF \"{function}\": {reason}")]
    UdfExecution { function: String, reason: String },

    #[error("Unsupported type {value_type} for UDF \"{function}\"")]
    UnsupportedUdfType { function: String, value_type: String },
}

impl FunctionError {
    pub fn invalid_argument(function: &str, reason: impl Into<String>) -> Self {
        FunctionError::InvalidArgument {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    pub fn udf(function: &str, reason: impl Into<String>) -> Self {
        FunctionError::UdfExecution {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<CompareError> for FunctionError {
    fn from(e: CompareError) -> Self {
        FunctionError::Comparison(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            FunctionError::NotFound("foo".into()).to_string(),
            "Function not found: foo"
        );
        assert_eq!(
            FunctionError::udf("inc", "wasm trap").to_string(),
            "Error evaluating UDF \"inc\": wasm trap"
        );
        assert_eq!(
            FunctionError::from(CompareError::Nan).to_string(),
            "Comparison with NaN"
        );
    }
}
