//! Expression compiler
//!
//! Turns a `TypedExpr` into a closure over a row slice. References are
//! resolved to positions once, against a `Layout`; functions are looked up
//! in the registry once. Evaluation only walks closures.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{EvaluationError, EvaluationResult};
use crate::functions::{FunctionRegistry, ScalarFunction};
use crate::parser::{BinaryOp, UnaryOp};
use crate::planner::{ExprKind, TypedExpr};
use crate::value::{Value, ValueType};

/// Compiled expression
pub type CompiledExpr = Arc<dyn Fn(&[Value]) -> EvaluationResult<Value> + Send + Sync>;

/// Positions of named columns in the rows an expression is evaluated on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Layout {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut layout = Self::default();
        for name in names {
            layout.push(name);
        }
        layout
    }

    pub fn push(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.positions.entry(name.clone()).or_insert(self.names.len());
        self.names.push(name);
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Compiles `expr` against `layout`
pub fn compile_expr(expr: &TypedExpr, layout: &Layout, registry: &FunctionRegistry) -> EvaluationResult<CompiledExpr> {
    match &expr.kind {
        ExprKind::Literal(value) => {
            let value = value.clone();
            Ok(Arc::new(move |_| Ok(value.clone())))
        }
        ExprKind::Reference(name) => {
            let position = layout
                .position(name)
                .ok_or_else(|| EvaluationError::evaluation_failed(format!("Column \"{}\" is not available", name)))?;
            Ok(Arc::new(move |row| {
                row.get(position)
                    .cloned()
                    .ok_or_else(|| EvaluationError::evaluation_failed(format!("Row has no column {}", position)))
            }))
        }
        ExprKind::Function { name, args } => {
            let function = registry
                .scalar(name)
                .cloned()
                .ok_or_else(|| EvaluationError::evaluation_failed(format!("Undefined function \"{}\"", name)))?;
            let args = compile_all(args, layout, registry)?;
            Ok(compile_call(function, args))
        }
        ExprKind::Unary { op, operand } => {
            let operand = compile_expr(operand, layout, registry)?;
            let op = *op;
            Ok(Arc::new(move |row| unary(op, operand(row)?)))
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lhs = compile_expr(lhs, layout, registry)?;
            let rhs = compile_expr(rhs, layout, registry)?;
            Ok(compile_binary(*op, lhs, rhs))
        }
        ExprKind::In { args, values } => {
            let args = compile_all(args, layout, registry)?;
            let values = values.clone();
            Ok(Arc::new(move |row| {
                let tuple = eval_all(&args, row)?;
                for candidate in &values {
                    if tuple_cmp(&tuple, candidate)? == Ordering::Equal {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            }))
        }
        ExprKind::Between { args, ranges } => {
            let args = compile_all(args, layout, registry)?;
            let ranges = ranges.clone();
            Ok(Arc::new(move |row| {
                let tuple = eval_all(&args, row)?;
                for (lower, upper) in &ranges {
                    if tuple_cmp(&tuple, lower)? != Ordering::Less && tuple_cmp(&tuple, upper)? != Ordering::Greater {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            }))
        }
        ExprKind::Transform {
            args,
            from,
            to,
            default,
        } => {
            let args = compile_all(args, layout, registry)?;
            let default = match default {
                Some(default) => Some(compile_expr(default, layout, registry)?),
                None => None,
            };
            let ty = expr.ty;
            let cases: Vec<(Vec<Value>, Value)> = from
                .iter()
                .cloned()
                .zip(to.iter().map(|value| fit(value, ty)))
                .collect();
            Ok(Arc::new(move |row| {
                let tuple = eval_all(&args, row)?;
                for (source, target) in &cases {
                    if tuple_cmp(&tuple, source)? == Ordering::Equal {
                        return Ok(target.clone());
                    }
                }
                match &default {
                    Some(default) => Ok(fit(&default(row)?, ty)),
                    None => Ok(Value::Null),
                }
            }))
        }
    }
}

pub fn compile_all(
    exprs: &[TypedExpr],
    layout: &Layout,
    registry: &FunctionRegistry,
) -> EvaluationResult<Vec<CompiledExpr>> {
    exprs.iter().map(|expr| compile_expr(expr, layout, registry)).collect()
}

/// Evaluates every expression on one row
pub fn eval_all(exprs: &[CompiledExpr], row: &[Value]) -> EvaluationResult<Vec<Value>> {
    exprs.iter().map(|expr| expr(row)).collect()
}

/// Three-valued predicate result; only `true` passes
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Boolean(true))
}

fn compile_call(function: ScalarFunction, args: Vec<CompiledExpr>) -> CompiledExpr {
    let function = Arc::new(function);
    Arc::new(move |row| {
        let values = eval_all(&args, row)?;
        Ok(function.invoke(&values)?)
    })
}

/// Fits a transform result to the declared type where lossless
fn fit(value: &Value, ty: ValueType) -> Value {
    value.coerce_lossless(ty).unwrap_or_else(|| value.clone())
}

/// Lexicographic comparison of a tuple against a possibly shorter bound
fn tuple_cmp(tuple: &[Value], bound: &[Value]) -> EvaluationResult<Ordering> {
    for (value, limit) in tuple.iter().zip(bound) {
        match value.compare(limit)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(Ordering::Equal)
}

fn compile_binary(op: BinaryOp, lhs: CompiledExpr, rhs: CompiledExpr) -> CompiledExpr {
    match op {
        BinaryOp::And => Arc::new(move |row| {
            let left = lhs(row)?;
            if left == Value::Boolean(false) {
                return Ok(left);
            }
            let right = rhs(row)?;
            Ok(match (left, right) {
                (_, Value::Boolean(false)) => Value::Boolean(false),
                (Value::Boolean(true), Value::Boolean(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }),
        BinaryOp::Or => Arc::new(move |row| {
            let left = lhs(row)?;
            if left == Value::Boolean(true) {
                return Ok(left);
            }
            let right = rhs(row)?;
            Ok(match (left, right) {
                (_, Value::Boolean(true)) => Value::Boolean(true),
                (Value::Boolean(false), Value::Boolean(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }),
        op if op.is_relational() => Arc::new(move |row| {
            let ordering = lhs(row)?.compare(&rhs(row)?)?;
            Ok(Value::Boolean(match op {
                BinaryOp::Equal => ordering == Ordering::Equal,
                BinaryOp::NotEqual => ordering != Ordering::Equal,
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessOrEqual => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }),
        op => Arc::new(move |row| arithmetic(op, &lhs(row)?, &rhs(row)?)),
    }
}

fn unary(op: UnaryOp, value: Value) -> EvaluationResult<Value> {
    Ok(match (op, value) {
        (_, Value::Null) => Value::Null,
        (UnaryOp::Plus, value) => value,
        (UnaryOp::Minus, Value::Int64(v)) => Value::Int64(v.wrapping_neg()),
        (UnaryOp::Minus, Value::Uint64(v)) => Value::Uint64(v.wrapping_neg()),
        (UnaryOp::Minus, Value::Double(v)) => Value::Double(-v),
        (UnaryOp::BitNot, Value::Int64(v)) => Value::Int64(!v),
        (UnaryOp::BitNot, Value::Uint64(v)) => Value::Uint64(!v),
        (UnaryOp::Not, Value::Boolean(b)) => Value::Boolean(!b),
        (op, value) => {
            return Err(EvaluationError::evaluation_failed(format!(
                "Operator \"{}\" is not defined for {}",
                op.symbol(),
                value.value_type()
            )))
        }
    })
}

fn division_by_zero() -> EvaluationError {
    EvaluationError::evaluation_failed("Division by zero")
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvaluationResult<Value> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int64(a), Value::Int64(b)) => {
            let (a, b) = (*a, *b);
            Ok(Value::Int64(match op {
                BinaryOp::Plus => a.wrapping_add(b),
                BinaryOp::Minus => a.wrapping_sub(b),
                BinaryOp::Multiply => a.wrapping_mul(b),
                BinaryOp::Divide if b == 0 => return Err(division_by_zero()),
                BinaryOp::Modulo if b == 0 => return Err(division_by_zero()),
                BinaryOp::Divide => a.wrapping_div(b),
                BinaryOp::Modulo => a.wrapping_rem(b),
                BinaryOp::LeftShift => a.wrapping_shl(b as u32),
                BinaryOp::RightShift => a.wrapping_shr(b as u32),
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                _ => return Err(undefined(op, lhs, rhs)),
            }))
        }
        (Value::Uint64(a), Value::Uint64(b)) => {
            let (a, b) = (*a, *b);
            Ok(Value::Uint64(match op {
                BinaryOp::Plus => a.wrapping_add(b),
                BinaryOp::Minus => a.wrapping_sub(b),
                BinaryOp::Multiply => a.wrapping_mul(b),
                BinaryOp::Divide if b == 0 => return Err(division_by_zero()),
                BinaryOp::Modulo if b == 0 => return Err(division_by_zero()),
                BinaryOp::Divide => a / b,
                BinaryOp::Modulo => a % b,
                BinaryOp::LeftShift => a.wrapping_shl(b as u32),
                BinaryOp::RightShift => a.wrapping_shr(b as u32),
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                _ => return Err(undefined(op, lhs, rhs)),
            }))
        }
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(match op {
            BinaryOp::Plus => a + b,
            BinaryOp::Minus => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            _ => return Err(undefined(op, lhs, rhs)),
        })),
        _ => match (lhs.as_f64(), rhs.as_f64(), op) {
            (Some(_), Some(_), BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide) => {
                let a = lhs.cast(ValueType::Double).map_err(EvaluationError::cast)?;
                let b = rhs.cast(ValueType::Double).map_err(EvaluationError::cast)?;
                arithmetic(op, &a, &b)
            }
            _ => Err(undefined(op, lhs, rhs)),
        },
    }
}

fn undefined(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvaluationError {
    EvaluationError::evaluation_failed(format!(
        "Operator \"{}\" is not defined for {} and {}",
        op.symbol(),
        lhs.value_type(),
        rhs.value_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluationErrorCode;
    use crate::planner::bind_standalone_expression;
    use crate::schema::{ColumnSchema, TableSchema};

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("a", ValueType::Int64),
            ColumnSchema::new("b", ValueType::Int64),
            ColumnSchema::new("d", ValueType::Double),
            ColumnSchema::new("s", ValueType::String),
        ])
        .unwrap()
    }

    fn eval(source: &str, row: Vec<Value>) -> EvaluationResult<Value> {
        let schema = schema();
        let registry = FunctionRegistry::builtin();
        let expr = bind_standalone_expression(source, &schema, &registry, 50).unwrap();
        let layout = Layout::new(schema.columns().iter().map(|c| c.name.clone()));
        let compiled = compile_expr(&expr, &layout, &registry)?;
        compiled(&row)
    }

    fn row(a: i64, b: i64) -> Vec<Value> {
        vec![Value::Int64(a), Value::Int64(b), Value::Double(1.5), Value::from("xyz")]
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(eval("a + b * 2", row(1, 3)).unwrap(), Value::Int64(7));
        assert_eq!(eval("a % 3 = 1", row(10, 0)).unwrap(), Value::Boolean(true));
        assert_eq!(eval("d * 2.0", row(0, 0)).unwrap(), Value::Double(3.0));
        assert_eq!(eval("-a", row(5, 0)).unwrap(), Value::Int64(-5));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("a / b", row(1, 0)).unwrap_err();
        assert_eq!(err.message(), "Division by zero");
    }

    #[test]
    fn test_three_valued_logic() {
        let nulls = vec![Value::Null, Value::Int64(1), Value::Null, Value::Null];
        assert_eq!(eval("a > 0 and b > 0", nulls.clone()).unwrap(), Value::Boolean(false));
        assert_eq!(eval("a + 1", nulls.clone()).unwrap(), Value::Null);
        assert_eq!(eval("is_null(a) or b > 5", nulls).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_in_with_widening() {
        assert_eq!(eval("a in (4.0, -10)", row(4, 0)).unwrap(), Value::Boolean(true));
        assert_eq!(eval("a in (4.0, -10)", row(-10, 0)).unwrap(), Value::Boolean(true));
        assert_eq!(eval("a in (4.0, -10)", row(5, 0)).unwrap(), Value::Boolean(false));
        assert_eq!(eval("(a, b) in ((1, 2), (3, 4))", row(3, 4)).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_between_prefix() {
        assert_eq!(eval("(a, b) between ((1) and (1, 5))", row(1, 3)).unwrap(), Value::Boolean(true));
        assert_eq!(eval("a between 1 and 3", row(4, 0)).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_transform() {
        let source = "transform(a, (1, 2), (\"one\", \"two\"), \"many\")";
        assert_eq!(eval(source, row(2, 0)).unwrap(), Value::from("two"));
        assert_eq!(eval(source, row(7, 0)).unwrap(), Value::from("many"));
    }

    #[test]
    fn test_nan_comparison_fails() {
        let err = eval("0.0 / d > 1.0", vec![Value::Null, Value::Null, Value::Double(0.0), Value::Null]).unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::Comparison);
    }

    #[test]
    fn test_functions_and_casts() {
        assert_eq!(eval("upper(s)", row(0, 0)).unwrap(), Value::from("XYZ"));
        let err = eval("int64(s)", row(0, 0)).unwrap_err();
        assert_eq!(err.code(), EvaluationErrorCode::Cast);
    }

    #[test]
    fn test_missing_column() {
        let registry = FunctionRegistry::builtin();
        let expr = TypedExpr::reference("zzz", ValueType::Int64);
        assert!(compile_expr(&expr, &Layout::new(["a"]), &registry).is_err());
    }
}
