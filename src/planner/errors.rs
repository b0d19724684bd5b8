//! Preparation error types
//!
//! Error codes:
//! - QL_SYNTAX_ERROR (REJECT)
//! - QL_UNRESOLVED_REFERENCE (REJECT)
//! - QL_AMBIGUOUS_REFERENCE (REJECT)
//! - QL_AGGREGATE_MISUSE (REJECT)
//! - QL_TYPE_MISMATCH (REJECT)
//! - QL_EXPRESSION_TOO_COMPLEX (REJECT)
//! - QL_ALIAS_COLLISION (REJECT)
//! - QL_PLACEHOLDER_ERROR (REJECT)
//! - QL_TABLE_NOT_FOUND (REJECT)
//! - QL_LIMIT_REQUIRED (REJECT)
//!
//! Every preparation error aborts before any data is read.

use std::fmt;

/// Severity levels for preparation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Client request rejected
    Reject,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareErrorCode {
    /// Malformed query text
    Syntax,
    /// Column, alias or table alias is not defined
    UnresolvedReference,
    /// Name resolves to more than one source column
    AmbiguousReference,
    /// Nested aggregate or non-grouped column outside an aggregate
    AggregateMisuse,
    /// Operand or argument types cannot be unified
    TypeMismatch,
    /// Expression nesting exceeds the configured depth
    ExpressionTooComplex,
    /// Two output columns share a name
    AliasCollision,
    /// Missing or malformed placeholder value
    Placeholder,
    /// Split provider does not know the table
    TableNotFound,
    /// ORDER BY or OFFSET without LIMIT
    LimitRequired,
}

impl PrepareErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            PrepareErrorCode::Syntax => "QL_SYNTAX_ERROR",
            PrepareErrorCode::UnresolvedReference => "QL_UNRESOLVED_REFERENCE",
            PrepareErrorCode::AmbiguousReference => "QL_AMBIGUOUS_REFERENCE",
            PrepareErrorCode::AggregateMisuse => "QL_AGGREGATE_MISUSE",
            PrepareErrorCode::TypeMismatch => "QL_TYPE_MISMATCH",
            PrepareErrorCode::ExpressionTooComplex => "QL_EXPRESSION_TOO_COMPLEX",
            PrepareErrorCode::AliasCollision => "QL_ALIAS_COLLISION",
            PrepareErrorCode::Placeholder => "QL_PLACEHOLDER_ERROR",
            PrepareErrorCode::TableNotFound => "QL_TABLE_NOT_FOUND",
            PrepareErrorCode::LimitRequired => "QL_LIMIT_REQUIRED",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Reject
    }
}

impl fmt::Display for PrepareErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Preparation error with optional source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareError {
    code: PrepareErrorCode,
    message: String,
    /// Byte offset into the query text
    position: Option<usize>,
}

impl PrepareError {
    fn new(code: PrepareErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
        }
    }

    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self {
            position: Some(position),
            ..Self::new(PrepareErrorCode::Syntax, message)
        }
    }

    pub fn unresolved_reference(name: &str) -> Self {
        Self::new(
            PrepareErrorCode::UnresolvedReference,
            format!("Undefined reference \"{}\"", name),
        )
    }

    pub fn undefined_function(name: &str) -> Self {
        Self::new(
            PrepareErrorCode::UnresolvedReference,
            format!("Undefined function \"{}\"", name),
        )
    }

    pub fn ambiguous_reference(name: &str) -> Self {
        Self::new(
            PrepareErrorCode::AmbiguousReference,
            format!("Ambiguous resolution for column \"{}\"", name),
        )
    }

    pub fn aggregate_misuse(detail: impl Into<String>) -> Self {
        Self::new(
            PrepareErrorCode::AggregateMisuse,
            format!("Misuse of aggregate: {}", detail.into()),
        )
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(PrepareErrorCode::TypeMismatch, message)
    }

    pub fn expression_too_complex(limit: usize) -> Self {
        Self::new(
            PrepareErrorCode::ExpressionTooComplex,
            format!("Maximum expression depth exceeded (limit {})", limit),
        )
    }

    pub fn alias_collision(alias: &str) -> Self {
        Self::new(
            PrepareErrorCode::AliasCollision,
            format!("Alias \"{}\" has been already used", alias),
        )
    }

    pub fn placeholder(message: impl Into<String>) -> Self {
        Self::new(PrepareErrorCode::Placeholder, message)
    }

    pub fn table_not_found(path: &str) -> Self {
        Self::new(
            PrepareErrorCode::TableNotFound,
            format!("Could not find table {}", path),
        )
    }

    pub fn limit_required(clause: &str) -> Self {
        Self::new(
            PrepareErrorCode::LimitRequired,
            format!("{} used without LIMIT", clause),
        )
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn code(&self) -> PrepareErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for PrepareError {}

/// Result type for preparation
pub type PrepareResult<T> = Result<T, PrepareError>;
