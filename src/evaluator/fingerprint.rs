//! Structural fingerprint of a prepared query
//!
//! The fingerprint is a SHA-256 over a canonical text encoding. Operands of
//! commutative operators and conjunct lists are sorted, and runs of
//! mutually independent joins are encoded in sorted order, so queries that
//! only permute those parts share a fingerprint and a compiled program.

use sha2::{Digest, Sha256};

use crate::parser::BinaryOp;
use crate::planner::{ExprKind, JoinClause, Query, TypedExpr};
use crate::value::Value;

/// Hex SHA-256 of the canonical encoding of `query`
pub fn fingerprint(query: &Query) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encode_query(query).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Join clause indexes in the order they are encoded and executed
pub fn canonical_join_order(query: &Query) -> Vec<usize> {
    query.canonical_join_order(encode_join)
}

fn encode_query(query: &Query) -> String {
    let mut out = String::new();
    out.push_str("schema:");
    out.push_str(&query.schema.fingerprint());
    out.push_str(";columns:");
    for column in &query.self_columns {
        out.push_str(&column.name);
        out.push(',');
    }

    for index in canonical_join_order(query) {
        out.push_str(";join:");
        out.push_str(&encode_join(&query.joins[index]));
    }

    if let Some(predicate) = &query.where_clause {
        out.push_str(";where:");
        out.push_str(&encode_expr(predicate));
    }

    if let Some(group) = &query.group {
        out.push_str(";group:");
        for item in &group.group_items {
            out.push_str(&format!("{}={},", item.name, encode_expr(&item.expr)));
        }
        out.push_str(";aggregates:");
        for item in &group.aggregate_items {
            out.push_str(&format!(
                "{}={}({}):{},",
                item.name,
                item.function,
                encode_expr(&item.argument),
                item.result_type
            ));
        }
        out.push_str(&format!(
            ";totals:{:?};disjoint:{}",
            group.totals_mode, group.use_disjoint_group_by
        ));
    }

    if let Some(having) = &query.having {
        out.push_str(";having:");
        out.push_str(&encode_expr(having));
    }

    if let Some(order) = &query.order {
        out.push_str(";order:");
        for item in &order.items {
            out.push_str(&encode_expr(&item.expr));
            out.push_str(if item.descending { " desc," } else { " asc," });
        }
    }

    out.push_str(";project:");
    for item in &query.projection {
        out.push_str(&format!("{}={},", item.name, encode_expr(&item.expr)));
    }

    out.push_str(&format!(
        ";offset:{};limit:{:?};ordered:{}",
        query.offset, query.limit, query.ordered_scan
    ));
    out
}

/// Canonical encoding of one join clause; also its sort key
///
/// The common key prefix is left out: it is chained through the joins in
/// source order and only steers the per-request join strategy.
fn encode_join(join: &JoinClause) -> String {
    let mut equations: Vec<String> = join
        .equations
        .iter()
        .map(|(lhs, rhs)| format!("{}=={}", encode_expr(lhs), encode_expr(rhs)))
        .collect();
    equations.sort();

    let columns: Vec<String> = join
        .foreign_columns
        .iter()
        .map(|c| format!("{}:{}", c.name, c.column))
        .collect();

    format!(
        "{:?}[{}]{{{}}}({})appended{:?}on({})prefix{}",
        join.kind,
        join.foreign_schema.fingerprint(),
        columns.join(","),
        equations.join(","),
        join.appended,
        join.predicate.as_ref().map(encode_expr).unwrap_or_default(),
        join.foreign_key_prefix,
    )
}

fn encode_value(value: &Value) -> String {
    format!("{}:{}", value.value_type(), value)
}

fn encode_values(values: &[Value]) -> String {
    values.iter().map(encode_value).collect::<Vec<_>>().join(",")
}

/// Operands of a chain of the same associative, commutative operator
fn flatten<'a>(expr: &'a TypedExpr, op: BinaryOp, out: &mut Vec<&'a TypedExpr>) {
    match &expr.kind {
        ExprKind::Binary { op: inner, lhs, rhs } if *inner == op => {
            flatten(lhs, op, out);
            flatten(rhs, op, out);
        }
        _ => out.push(expr),
    }
}

fn encode_expr(expr: &TypedExpr) -> String {
    match &expr.kind {
        ExprKind::Literal(value) => encode_value(value),
        ExprKind::Reference(name) => format!("${}", name),
        ExprKind::Function { name, args } => {
            let args: Vec<String> = args.iter().map(encode_expr).collect();
            format!("{}({}):{}", name, args.join(","), expr.ty)
        }
        ExprKind::Unary { op, operand } => format!("{}({})", op.symbol(), encode_expr(operand)),
        ExprKind::Binary { op, lhs, rhs } => match op {
            BinaryOp::And | BinaryOp::Or => {
                let mut operands = Vec::new();
                flatten(expr, *op, &mut operands);
                let mut encoded: Vec<String> = operands.into_iter().map(encode_expr).collect();
                encoded.sort();
                format!("{}[{}]", op.symbol(), encoded.join(","))
            }
            op if op.is_commutative() => {
                let mut pair = [encode_expr(lhs), encode_expr(rhs)];
                pair.sort();
                format!("({} {} {}):{}", pair[0], op.symbol(), pair[1], expr.ty)
            }
            op => format!("({} {} {}):{}", encode_expr(lhs), op.symbol(), encode_expr(rhs), expr.ty),
        },
        ExprKind::In { args, values } => {
            let args: Vec<String> = args.iter().map(encode_expr).collect();
            let values: Vec<String> = values.iter().map(|tuple| encode_values(tuple)).collect();
            format!("in({};{})", args.join(","), values.join("|"))
        }
        ExprKind::Between { args, ranges } => {
            let args: Vec<String> = args.iter().map(encode_expr).collect();
            let ranges: Vec<String> = ranges
                .iter()
                .map(|(lower, upper)| format!("{}..{}", encode_values(lower), encode_values(upper)))
                .collect();
            format!("between({};{})", args.join(","), ranges.join("|"))
        }
        ExprKind::Transform {
            args,
            from,
            to,
            default,
        } => {
            let args: Vec<String> = args.iter().map(encode_expr).collect();
            let from: Vec<String> = from.iter().map(|tuple| encode_values(tuple)).collect();
            format!(
                "transform({};{};{};{}):{}",
                args.join(","),
                from.join("|"),
                encode_values(to),
                default.as_deref().map(encode_expr).unwrap_or_default(),
                expr.ty
            )
        }
    }
}
