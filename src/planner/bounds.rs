//! Boundedness checks
//!
//! A prepared query must:
//! - carry a LIMIT whenever it sorts or skips rows
//! - keep every expression within the configured nesting depth

use super::errors::{PrepareError, PrepareResult};
use super::expr::TypedExpr;

/// Rejects ORDER BY or OFFSET without LIMIT
pub fn check_limit(has_order: bool, has_offset: bool, limit: Option<u64>) -> PrepareResult<()> {
    if limit.is_some() {
        return Ok(());
    }
    if has_order {
        return Err(PrepareError::limit_required("ORDER BY"));
    }
    if has_offset {
        return Err(PrepareError::limit_required("OFFSET"));
    }
    Ok(())
}

/// Rejects expressions nested deeper than `max_depth`
pub fn check_depth(expr: &TypedExpr, max_depth: usize) -> PrepareResult<()> {
    if expr.depth() > max_depth {
        return Err(PrepareError::expression_too_complex(max_depth));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::BinaryOp;
    use crate::planner::errors::PrepareErrorCode;
    use crate::value::{Value, ValueType};

    #[test]
    fn test_limit_required() {
        assert!(check_limit(true, true, Some(10)).is_ok());
        assert!(check_limit(false, false, None).is_ok());
        let err = check_limit(true, false, None).unwrap_err();
        assert_eq!(err.message(), "ORDER BY used without LIMIT");
        let err = check_limit(false, true, None).unwrap_err();
        assert_eq!(err.message(), "OFFSET used without LIMIT");
    }

    #[test]
    fn test_depth() {
        let mut expr = TypedExpr::reference("a", ValueType::Int64);
        for i in 0..5 {
            expr = TypedExpr::binary(BinaryOp::Plus, expr, TypedExpr::literal(Value::Int64(i)), ValueType::Int64);
        }
        assert_eq!(expr.depth(), 6);
        assert!(check_depth(&expr, 6).is_ok());
        assert_eq!(
            check_depth(&expr, 5).unwrap_err().code(),
            PrepareErrorCode::ExpressionTooComplex
        );
    }
}
