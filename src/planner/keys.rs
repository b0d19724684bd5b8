//! Key prefix analyses
//!
//! - join prefixes: how much of the foreign key an equation list fixes and
//!   how long a prefix both keys share
//! - disjoint group-by: whether group keys cover the primary key prefix
//! - order reduction: whether ORDER BY repeats the scan order

use std::collections::{BTreeSet, HashMap};

use super::expr::TypedExpr;
use super::query::{ColumnMapping, NamedItem, OrderItem};
use crate::parser::{parse_expression, Expr};
use crate::schema::TableSchema;

/// Depth used when re-parsing computed column expressions
const COMPUTED_EXPRESSION_DEPTH: usize = 50;

fn computed_expression(schema: &TableSchema, index: usize) -> Option<Expr> {
    let text = schema.column(index).expression.as_deref()?;
    parse_expression(text, COMPUTED_EXPRESSION_DEPTH).ok()
}

fn expr_references(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Reference(column) => {
            names.insert(column.name.clone());
        }
        Expr::Function { args, .. } | Expr::Tuple(args) | Expr::In { args, .. } | Expr::Between { args, .. } => {
            args.iter().for_each(|arg| expr_references(arg, names))
        }
        Expr::Unary { operand, .. } => expr_references(operand, names),
        Expr::Binary { lhs, rhs, .. } => {
            expr_references(lhs, names);
            expr_references(rhs, names);
        }
        Expr::Transform { args, default, .. } => {
            args.iter().for_each(|arg| expr_references(arg, names));
            if let Some(default) = default {
                expr_references(default, names);
            }
        }
    }
}

/// Column names a computed expression reads
pub fn computed_references(schema: &TableSchema, index: usize) -> Option<BTreeSet<String>> {
    let expr = computed_expression(schema, index)?;
    let mut names = BTreeSet::new();
    expr_references(&expr, &mut names);
    Some(names)
}

fn rename_expr(expr: &Expr, rename: &HashMap<String, String>) -> Option<Expr> {
    let all = |items: &[Expr]| -> Option<Vec<Expr>> { items.iter().map(|e| rename_expr(e, rename)).collect() };
    Some(match expr {
        Expr::Literal(value) => Expr::Literal(value.clone()),
        Expr::Reference(column) => Expr::reference(rename.get(&column.name)?),
        Expr::Function { name, args } => Expr::Function {
            name: name.clone(),
            args: all(args)?,
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(rename_expr(operand, rename)?),
        },
        Expr::Binary { op, lhs, rhs } => Expr::binary(*op, rename_expr(lhs, rename)?, rename_expr(rhs, rename)?),
        Expr::Tuple(items) => Expr::Tuple(all(items)?),
        Expr::In { args, values } => Expr::In {
            args: all(args)?,
            values: values.clone(),
        },
        Expr::Between { args, ranges } => Expr::Between {
            args: all(args)?,
            ranges: ranges.clone(),
        },
        Expr::Transform {
            args,
            from,
            to,
            default,
        } => Expr::Transform {
            args: all(args)?,
            from: from.clone(),
            to: to.clone(),
            default: match default {
                Some(default) => Some(Box::new(rename_expr(default, rename)?)),
                None => None,
            },
        },
    })
}

/// Schema column names of the foreign side fixed by plain equations,
/// mapped to the expression on the self side
fn equated_foreign_columns<'a>(
    equations: &'a [(TypedExpr, TypedExpr)],
    foreign_columns: &[ColumnMapping],
) -> HashMap<String, &'a TypedExpr> {
    let mut equated = HashMap::new();
    for (self_expr, foreign_expr) in equations {
        if let Some(name) = foreign_expr.as_reference() {
            if let Some(mapping) = foreign_columns.iter().find(|c| c.name == name) {
                equated.entry(mapping.column.clone()).or_insert(self_expr);
            }
        }
    }
    equated
}

/// Longest foreign key prefix fixed by the equations. Computed columns count
/// when every column they read is fixed.
pub fn foreign_key_prefix(
    equations: &[(TypedExpr, TypedExpr)],
    foreign_schema: &TableSchema,
    foreign_columns: &[ColumnMapping],
) -> usize {
    let equated = equated_foreign_columns(equations, foreign_columns);
    let mut prefix = 0;
    for index in 0..foreign_schema.key_column_count() {
        let column = &foreign_schema.column(index).name;
        let fixed = equated.contains_key(column)
            || computed_references(foreign_schema, index)
                .map_or(false, |refs| refs.iter().all(|r| equated.contains_key(r)));
        if !fixed {
            break;
        }
        prefix += 1;
    }
    prefix
}

/// Longest prefix on which the primary and foreign keys coincide, capped by
/// `previous` (the prefix of the preceding clause) and the foreign key prefix
pub fn common_key_prefix(
    equations: &[(TypedExpr, TypedExpr)],
    primary_schema: &TableSchema,
    self_columns: &[ColumnMapping],
    foreign_schema: &TableSchema,
    foreign_columns: &[ColumnMapping],
    previous: usize,
    foreign_prefix: usize,
) -> usize {
    let equated = equated_foreign_columns(equations, foreign_columns);

    // primary schema column -> foreign schema column, for plain equations
    let mut primary_to_foreign: HashMap<String, String> = HashMap::new();
    for (foreign_column, self_expr) in &equated {
        if let Some(mapping) = self_expr
            .as_reference()
            .and_then(|name| self_columns.iter().find(|c| c.name == name))
        {
            primary_to_foreign
                .entry(mapping.column.clone())
                .or_insert_with(|| foreign_column.clone());
        }
    }

    let limit = primary_schema
        .key_column_count()
        .min(foreign_schema.key_column_count())
        .min(previous)
        .min(foreign_prefix);
    let mut prefix = 0;
    while prefix < limit {
        let primary = primary_schema.column(prefix);
        let foreign = foreign_schema.column(prefix);
        let matches = match (primary.is_computed(), foreign.is_computed()) {
            (false, false) => primary_to_foreign.get(&primary.name) == Some(&foreign.name),
            (true, true) => {
                let mapped = computed_expression(primary_schema, prefix)
                    .and_then(|expr| rename_expr(&expr, &primary_to_foreign));
                mapped.is_some() && mapped == computed_expression(foreign_schema, prefix)
            }
            _ => false,
        };
        if !matches {
            break;
        }
        prefix += 1;
    }
    prefix
}

/// `(covered key prefix length, group items inside it)`
pub fn group_key_coverage(
    group_items: &[NamedItem],
    schema: &TableSchema,
    self_columns: &[ColumnMapping],
) -> (usize, usize) {
    let grouped: BTreeSet<&str> = group_items
        .iter()
        .filter_map(|item| item.expr.as_reference())
        .filter_map(|name| self_columns.iter().find(|c| c.name == name))
        .map(|c| c.column.as_str())
        .collect();

    let mut covered = 0;
    for index in 0..schema.key_column_count() {
        let column = schema.column(index).name.as_str();
        let ok = grouped.contains(column)
            || computed_references(schema, index)
                .map_or(false, |refs| refs.iter().all(|r| grouped.contains(r.as_str())));
        if !ok {
            break;
        }
        covered += 1;
    }

    let in_prefix = schema.key_columns()[..covered]
        .iter()
        .filter(|c| grouped.contains(c.name.as_str()))
        .count();
    (covered, in_prefix)
}

/// Whether ORDER BY is ascending plain references to key columns `0..n`
pub fn order_follows_key(items: &[OrderItem], schema: &TableSchema, self_columns: &[ColumnMapping]) -> bool {
    if items.is_empty() || items.len() > schema.key_column_count() {
        return false;
    }
    items.iter().enumerate().all(|(position, item)| {
        !item.descending
            && item
                .expr
                .as_reference()
                .and_then(|name| self_columns.iter().find(|c| c.name == name))
                .map_or(false, |c| c.index == position)
    })
}
