//! Predicate to column constraints
//!
//! A predicate is turned into a disjunction of conjunctions; each
//! conjunction maps a schema column to the values it may take. The result
//! is always a superset of the rows the predicate accepts: shapes that are
//! not understood leave their columns unconstrained.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::parser::BinaryOp;
use crate::planner::{ExprKind, TypedExpr};
use crate::value::{Value, ValueType};

/// One end of an interval
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

impl Bound {
    fn new(value: Value, inclusive: bool) -> Self {
        Self { value, inclusive }
    }
}

/// Values one column may take
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Sorted, distinct values of the column type
    Points(Vec<Value>),
    Interval {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

impl Constraint {
    pub fn points(mut values: Vec<Value>) -> Self {
        values.sort_by(|a, b| a.widened_cmp(b));
        values.dedup_by(|a, b| a.widened_cmp(b) == Ordering::Equal);
        Constraint::Points(values)
    }

    fn admits(&self, value: &Value) -> bool {
        match self {
            Constraint::Points(points) => points.iter().any(|p| p.widened_cmp(value) == Ordering::Equal),
            Constraint::Interval { lower, upper } => {
                let above = lower.as_ref().map_or(true, |bound| match value.widened_cmp(&bound.value) {
                    Ordering::Greater => true,
                    Ordering::Equal => bound.inclusive,
                    Ordering::Less => false,
                });
                let below = upper.as_ref().map_or(true, |bound| match value.widened_cmp(&bound.value) {
                    Ordering::Less => true,
                    Ordering::Equal => bound.inclusive,
                    Ordering::Greater => false,
                });
                above && below
            }
        }
    }

    /// Values admitted by both, `None` when nothing is
    pub fn intersect(&self, other: &Constraint) -> Option<Constraint> {
        let result = match (self, other) {
            (Constraint::Points(points), other) | (other, Constraint::Points(points)) => {
                Constraint::Points(points.iter().filter(|p| other.admits(p)).cloned().collect())
            }
            (
                Constraint::Interval { lower: l1, upper: u1 },
                Constraint::Interval { lower: l2, upper: u2 },
            ) => Constraint::Interval {
                lower: tighter(l1, l2, Ordering::Greater),
                upper: tighter(u1, u2, Ordering::Less),
            },
        };
        (!result.is_empty()).then_some(result)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Constraint::Points(points) => points.is_empty(),
            Constraint::Interval {
                lower: Some(lower),
                upper: Some(upper),
            } => match lower.value.widened_cmp(&upper.value) {
                Ordering::Greater => true,
                Ordering::Equal => !(lower.inclusive && upper.inclusive),
                Ordering::Less => false,
            },
            Constraint::Interval { .. } => false,
        }
    }
}

/// Picks the more restrictive of two bounds; `wins` is the ordering of a
/// more restrictive value against a less restrictive one
fn tighter(a: &Option<Bound>, b: &Option<Bound>, wins: Ordering) -> Option<Bound> {
    match (a, b) {
        (None, bound) | (bound, None) => bound.clone(),
        (Some(a), Some(b)) => match a.value.widened_cmp(&b.value) {
            Ordering::Equal => Some(Bound::new(a.value.clone(), a.inclusive && b.inclusive)),
            ordering if ordering == wins => Some(a.clone()),
            _ => Some(b.clone()),
        },
    }
}

/// Per-column constraints that hold together, keyed by schema column index
pub type Conjunction = BTreeMap<usize, Constraint>;

/// Alternatives; empty means the predicate never holds
pub type Disjunction = Vec<Conjunction>;

fn universal() -> Disjunction {
    vec![Conjunction::new()]
}

/// Resolves a reference to its schema column index and type
pub type Resolver<'a> = dyn Fn(&str) -> Option<(usize, ValueType)> + 'a;

pub struct ConstraintExtractor<'a> {
    resolve: &'a Resolver<'a>,
    limit: usize,
}

impl<'a> ConstraintExtractor<'a> {
    /// `limit` caps the number of alternatives; beyond it a subexpression
    /// is treated as unconstrained
    pub fn new(resolve: &'a Resolver<'a>, limit: usize) -> Self {
        Self {
            resolve,
            limit: limit.max(1),
        }
    }

    pub fn extract(&self, expr: &TypedExpr) -> Disjunction {
        match &expr.kind {
            ExprKind::Literal(Value::Boolean(true)) => universal(),
            ExprKind::Literal(Value::Boolean(false)) | ExprKind::Literal(Value::Null) => Vec::new(),
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => self.and(self.extract(lhs), self.extract(rhs)),
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let mut alternatives = self.extract(lhs);
                alternatives.extend(self.extract(rhs));
                self.capped(alternatives)
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_relational() => self.comparison(*op, lhs, rhs),
            ExprKind::In { args, values } => self.in_list(args, values),
            ExprKind::Between { args, ranges } => self.between(args, ranges),
            _ => universal(),
        }
    }

    fn capped(&self, alternatives: Disjunction) -> Disjunction {
        if alternatives.len() > self.limit {
            universal()
        } else {
            alternatives
        }
    }

    fn and(&self, left: Disjunction, right: Disjunction) -> Disjunction {
        if left.len().saturating_mul(right.len()) > self.limit {
            // Either side alone is still a valid superset
            return if left.len() <= right.len() { left } else { right };
        }
        let mut product = Vec::with_capacity(left.len() * right.len());
        for l in &left {
            'pairs: for r in &right {
                let mut merged = l.clone();
                for (column, constraint) in r {
                    let combined = match merged.get(column) {
                        Some(existing) => match existing.intersect(constraint) {
                            Some(combined) => combined,
                            None => continue 'pairs,
                        },
                        None => constraint.clone(),
                    };
                    merged.insert(*column, combined);
                }
                product.push(merged);
            }
        }
        product
    }

    fn column(&self, expr: &TypedExpr) -> Option<(usize, ValueType)> {
        expr.as_reference().and_then(|name| (self.resolve)(name))
    }

    fn comparison(&self, op: BinaryOp, lhs: &TypedExpr, rhs: &TypedExpr) -> Disjunction {
        let (op, column, literal) = match (self.column(lhs), rhs.as_literal(), self.column(rhs), lhs.as_literal()) {
            (Some(column), Some(literal), _, _) => (op, column, literal),
            (_, _, Some(column), Some(literal)) => (op.reversed(), column, literal),
            _ => return universal(),
        };
        let (index, ty) = column;
        let Some(value) = literal.coerce_lossless(ty) else {
            // Equality with a value the column cannot hold never matches
            return if op == BinaryOp::Equal { Vec::new() } else { universal() };
        };
        let constraint = match op {
            BinaryOp::Equal => Constraint::Points(vec![value]),
            BinaryOp::Less => Constraint::Interval {
                lower: None,
                upper: Some(Bound::new(value, false)),
            },
            BinaryOp::LessOrEqual => Constraint::Interval {
                lower: None,
                upper: Some(Bound::new(value, true)),
            },
            BinaryOp::Greater => Constraint::Interval {
                lower: Some(Bound::new(value, false)),
                upper: None,
            },
            BinaryOp::GreaterOrEqual => Constraint::Interval {
                lower: Some(Bound::new(value, true)),
                upper: None,
            },
            _ => return universal(),
        };
        vec![Conjunction::from([(index, constraint)])]
    }

    fn in_list(&self, args: &[TypedExpr], values: &[Vec<Value>]) -> Disjunction {
        let columns: Vec<Option<(usize, ValueType)>> = args.iter().map(|arg| self.column(arg)).collect();
        if columns.iter().all(Option::is_none) {
            return universal();
        }
        if let [Some((index, ty))] = columns.as_slice() {
            let points: Vec<Value> = values
                .iter()
                .filter_map(|tuple| tuple.first().and_then(|v| v.coerce_lossless(*ty)))
                .collect();
            if points.is_empty() {
                return Vec::new();
            }
            return vec![Conjunction::from([(*index, Constraint::points(points))])];
        }

        let mut alternatives = Vec::with_capacity(values.len());
        'tuples: for tuple in values {
            let mut conjunction = Conjunction::new();
            for (column, value) in columns.iter().zip(tuple) {
                let Some((index, ty)) = column else { continue };
                let Some(value) = value.coerce_lossless(*ty) else {
                    continue 'tuples;
                };
                let point = Constraint::Points(vec![value]);
                match conjunction.get(index) {
                    Some(existing) => match existing.intersect(&point) {
                        Some(combined) => {
                            conjunction.insert(*index, combined);
                        }
                        None => continue 'tuples,
                    },
                    None => {
                        conjunction.insert(*index, point);
                    }
                }
            }
            alternatives.push(conjunction);
        }
        self.capped(alternatives)
    }

    fn between(&self, args: &[TypedExpr], ranges: &[(Vec<Value>, Vec<Value>)]) -> Disjunction {
        let mut alternatives = Vec::with_capacity(ranges.len());
        for (lower, upper) in ranges {
            let mut conjunction = Conjunction::new();
            let width = args.len().min(lower.len()).min(upper.len());
            for position in 0..width {
                let Some((index, ty)) = self.column(&args[position]) else { break };
                let (low, high) = (&lower[position], &upper[position]);
                let same = low.widened_cmp(high) == Ordering::Equal;
                let constraint = if same {
                    match low.coerce_lossless(ty) {
                        Some(value) => Constraint::Points(vec![value]),
                        None => break,
                    }
                } else {
                    match (low.coerce_lossless(ty), high.coerce_lossless(ty)) {
                        (Some(low), Some(high)) => Constraint::Interval {
                            lower: Some(Bound::new(low, true)),
                            upper: Some(Bound::new(high, true)),
                        },
                        _ => break,
                    }
                };
                let constraint = match conjunction.get(&index) {
                    Some(existing) => match existing.intersect(&constraint) {
                        Some(combined) => combined,
                        None => break,
                    },
                    None => constraint,
                };
                conjunction.insert(index, constraint);
                if !same {
                    break;
                }
            }
            alternatives.push(conjunction);
        }
        self.capped(alternatives)
    }
}
