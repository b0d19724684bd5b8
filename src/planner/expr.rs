//! Typed expressions
//!
//! Produced by binding syntax against a namespace. References name columns
//! of the row the expression is evaluated against: source columns before
//! grouping, group and aggregate items after.

use std::collections::BTreeSet;
use std::fmt;

use crate::parser::{BinaryOp, UnaryOp};
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub kind: ExprKind,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Reference(String),
    Function {
        name: String,
        args: Vec<TypedExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    In {
        args: Vec<TypedExpr>,
        values: Vec<Vec<Value>>,
    },
    Between {
        args: Vec<TypedExpr>,
        ranges: Vec<(Vec<Value>, Vec<Value>)>,
    },
    Transform {
        args: Vec<TypedExpr>,
        from: Vec<Vec<Value>>,
        to: Vec<Value>,
        default: Option<Box<TypedExpr>>,
    },
}

impl TypedExpr {
    pub fn new(kind: ExprKind, ty: ValueType) -> Self {
        Self { kind, ty }
    }

    pub fn literal(value: Value) -> Self {
        let ty = value.value_type();
        Self::new(ExprKind::Literal(value), ty)
    }

    pub fn reference(name: impl Into<String>, ty: ValueType) -> Self {
        Self::new(ExprKind::Reference(name.into()), ty)
    }

    pub fn binary(op: BinaryOp, lhs: TypedExpr, rhs: TypedExpr, ty: ValueType) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    pub fn not(operand: TypedExpr) -> Self {
        Self::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            ValueType::Boolean,
        )
    }

    /// Conjunction of `items`, `None` when empty
    pub fn and_all(items: Vec<TypedExpr>) -> Option<TypedExpr> {
        items
            .into_iter()
            .reduce(|lhs, rhs| TypedExpr::binary(BinaryOp::And, lhs, rhs, ValueType::Boolean))
    }

    /// Disjunction of `items`, `None` when empty
    pub fn or_all(items: Vec<TypedExpr>) -> Option<TypedExpr> {
        items
            .into_iter()
            .reduce(|lhs, rhs| TypedExpr::binary(BinaryOp::Or, lhs, rhs, ValueType::Boolean))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Reference(name) => Some(name),
            _ => None,
        }
    }

    /// Top-level `AND` operands
    pub fn conjuncts(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let mut items = lhs.conjuncts();
                items.extend(rhs.conjuncts());
                items
            }
            _ => vec![self],
        }
    }

    pub fn children(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Reference(_) => Vec::new(),
            ExprKind::Function { args, .. } | ExprKind::In { args, .. } | ExprKind::Between { args, .. } => {
                args.iter().collect()
            }
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Transform { args, default, .. } => {
                let mut children: Vec<&TypedExpr> = args.iter().collect();
                if let Some(default) = default {
                    children.push(default);
                }
                children
            }
        }
    }

    /// Nesting depth; a leaf has depth 1
    pub fn depth(&self) -> usize {
        1 + self.children().into_iter().map(TypedExpr::depth).max().unwrap_or(0)
    }

    /// Names of every referenced column
    pub fn references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut BTreeSet<String>) {
        if let ExprKind::Reference(name) = &self.kind {
            names.insert(name.clone());
        }
        for child in self.children() {
            child.collect_references(names);
        }
    }

    /// Copy with every reference renamed through `rename`; `None` aborts
    pub fn rename_references(&self, rename: &dyn Fn(&str) -> Option<String>) -> Option<TypedExpr> {
        let map_all = |items: &[TypedExpr]| -> Option<Vec<TypedExpr>> {
            items.iter().map(|item| item.rename_references(rename)).collect()
        };
        let kind = match &self.kind {
            ExprKind::Literal(value) => ExprKind::Literal(value.clone()),
            ExprKind::Reference(name) => ExprKind::Reference(rename(name)?),
            ExprKind::Function { name, args } => ExprKind::Function {
                name: name.clone(),
                args: map_all(args)?,
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: Box::new(operand.rename_references(rename)?),
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op: *op,
                lhs: Box::new(lhs.rename_references(rename)?),
                rhs: Box::new(rhs.rename_references(rename)?),
            },
            ExprKind::In { args, values } => ExprKind::In {
                args: map_all(args)?,
                values: values.clone(),
            },
            ExprKind::Between { args, ranges } => ExprKind::Between {
                args: map_all(args)?,
                ranges: ranges.clone(),
            },
            ExprKind::Transform {
                args,
                from,
                to,
                default,
            } => ExprKind::Transform {
                args: map_all(args)?,
                from: from.clone(),
                to: to.clone(),
                default: match default {
                    Some(default) => Some(Box::new(default.rename_references(rename)?)),
                    None => None,
                },
            },
        };
        Some(TypedExpr::new(kind, self.ty))
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    if values.len() == 1 {
        return write!(f, "{}", values[0]);
    }
    write!(f, "(")?;
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value)?;
    }
    write!(f, ")")
}

fn write_exprs(f: &mut fmt::Formatter<'_>, items: &[TypedExpr]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &TypedExpr) -> fmt::Result {
    match expr.kind {
        ExprKind::Binary { .. } | ExprKind::In { .. } | ExprKind::Between { .. } => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[TypedExpr]) -> fmt::Result {
    if args.len() == 1 {
        return write_operand(f, &args[0]);
    }
    write!(f, "(")?;
    write_exprs(f, args)?;
    write!(f, ")")
}

impl fmt::Display for TypedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(value) => write!(f, "{}", value),
            ExprKind::Reference(name) => write!(f, "{}", name),
            ExprKind::Function { name, args } => {
                write!(f, "{}(", name)?;
                write_exprs(f, args)?;
                write!(f, ")")
            }
            ExprKind::Unary { op: UnaryOp::Not, operand } => {
                write!(f, "not ")?;
                write_operand(f, operand)
            }
            ExprKind::Unary { op, operand } => {
                write!(f, "{}", op.symbol())?;
                write_operand(f, operand)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            ExprKind::In { args, values } => {
                write_args(f, args)?;
                write!(f, " in (")?;
                for (index, tuple) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_values(f, tuple)?;
                }
                write!(f, ")")
            }
            ExprKind::Between { args, ranges } => {
                write_args(f, args)?;
                write!(f, " between (")?;
                for (index, (lower, upper)) in ranges.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_values(f, lower)?;
                    write!(f, " and ")?;
                    write_values(f, upper)?;
                }
                write!(f, ")")
            }
            ExprKind::Transform {
                args,
                from,
                to,
                default,
            } => {
                write!(f, "transform(")?;
                write_args(f, args)?;
                write!(f, ", (")?;
                for (index, tuple) in from.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write_values(f, tuple)?;
                }
                write!(f, "), ")?;
                write_values(f, to)?;
                if let Some(default) = default {
                    write!(f, ", {}", default)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> TypedExpr {
        TypedExpr::reference(name, ValueType::Int64)
    }

    fn gt(name: &str, value: i64) -> TypedExpr {
        TypedExpr::binary(
            BinaryOp::Greater,
            col(name),
            TypedExpr::literal(Value::Int64(value)),
            ValueType::Boolean,
        )
    }

    #[test]
    fn test_conjuncts_flatten() {
        let expr = TypedExpr::and_all(vec![gt("a", 1), gt("b", 2), gt("c", 3)]).unwrap();
        let conjuncts = expr.conjuncts();
        assert_eq!(conjuncts.len(), 3);
        assert_eq!(conjuncts[2].to_string(), "c > 3");
        assert!(TypedExpr::and_all(Vec::new()).is_none());
    }

    #[test]
    fn test_depth_and_references() {
        let expr = TypedExpr::or_all(vec![gt("a", 1), gt("b", 2)]).unwrap();
        assert_eq!(expr.depth(), 3);
        let names: Vec<_> = expr.references().into_iter().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_rename_references() {
        let expr = gt("t.a", 5);
        let renamed = expr
            .rename_references(&|name| name.strip_prefix("t.").map(str::to_string))
            .unwrap();
        assert_eq!(renamed.to_string(), "a > 5");
        assert!(gt("a", 5).rename_references(&|_| None).is_none());
    }
}
