//! Schema error types
//!
//! Error codes:
//! - QL_SCHEMA_INVALID_KEY (REJECT)
//! - QL_SCHEMA_DUPLICATE_COLUMN (REJECT)
//! - QL_SCHEMA_VALIDATION_FAILED (REJECT)

use std::fmt;

/// Severity levels for schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Input rejected
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

/// Schema error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Sort-ordered columns do not form a prefix
    InvalidKey,
    /// Two columns share a name
    DuplicateColumn,
    /// A row does not conform to the schema
    ValidationFailed,
}

impl SchemaErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::InvalidKey => "QL_SCHEMA_INVALID_KEY",
            SchemaErrorCode::DuplicateColumn => "QL_SCHEMA_DUPLICATE_COLUMN",
            SchemaErrorCode::ValidationFailed => "QL_SCHEMA_VALIDATION_FAILED",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Validation failure details
#[derive(Debug, Clone)]
pub struct ValidationDetails {
    /// Column name
    pub column: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(column: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn null_value(column: impl Into<String>) -> Self {
        Self::new(column, "non-null value", "null")
    }

    pub fn extra_column(column: impl Into<String>) -> Self {
        Self::new(column, "no undeclared columns", "extra column present")
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "column '{}': expected {}, got {}", self.column, self.expected, self.actual)
    }
}

/// Schema error type with full context
#[derive(Debug, Clone)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    details: Option<ValidationDetails>,
}

impl SchemaError {
    /// Key columns are not a contiguous prefix
    pub fn invalid_key(column: &str) -> Self {
        Self {
            code: SchemaErrorCode::InvalidKey,
            message: format!(
                "Sort-ordered column '{}' does not extend the key prefix",
                column
            ),
            details: None,
        }
    }

    /// Two columns share a name
    pub fn duplicate_column(column: &str) -> Self {
        Self {
            code: SchemaErrorCode::DuplicateColumn,
            message: format!("Duplicate column '{}'", column),
            details: None,
        }
    }

    /// A row does not conform to the schema
    pub fn validation_failed(details: ValidationDetails) -> Self {
        Self {
            code: SchemaErrorCode::ValidationFailed,
            message: format!("Row validation failed: {}", details),
            details: Some(details),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> SchemaErrorCode {
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

    /// Returns validation details if present
    pub fn details(&self) -> Option<&ValidationDetails> {
        self.details.as_ref()
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for SchemaError {}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::validation_failed(ValidationDetails::null_value("k"));
        let display = err.to_string();
        assert!(display.contains("REJECT"));
        assert!(display.contains("QL_SCHEMA_VALIDATION_FAILED"));
        assert!(display.contains("column 'k'"));
        assert!(err.details().is_some());
    }
}
