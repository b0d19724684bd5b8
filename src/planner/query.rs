//! Typed logical plan

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::expr::TypedExpr;
use crate::parser::TotalsMode;
use crate::schema::TableSchema;
use crate::value::ValueType;

/// Expression with its output name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedItem {
    pub expr: TypedExpr,
    pub name: String,
}

impl NamedItem {
    pub fn new(expr: TypedExpr, name: impl Into<String>) -> Self {
        Self {
            expr,
            name: name.into(),
        }
    }
}

/// Aggregate call computed per group
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateItem {
    pub function: String,
    pub argument: TypedExpr,
    /// Column name the finalized value is exposed under
    pub name: String,
    pub state_type: ValueType,
    pub result_type: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupClause {
    pub group_items: Vec<NamedItem>,
    pub aggregate_items: Vec<AggregateItem>,
    /// Group items that are plain references into the covered key prefix
    pub common_prefix_with_primary_key: usize,
    /// Group keys cover the whole key prefix, so splits never share a group
    pub use_disjoint_group_by: bool,
    pub totals_mode: TotalsMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: TypedExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

/// Source column exposed in the joined namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Unique name inside the query
    pub name: String,
    /// Column name in its table schema
    pub column: String,
    /// Position in its table schema
    pub index: usize,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub foreign_path: String,
    pub foreign_object_id: Uuid,
    pub foreign_schema: Arc<TableSchema>,
    pub foreign_alias: Option<String>,
    /// `(self expression, foreign expression)`
    pub equations: Vec<(TypedExpr, TypedExpr)>,
    pub common_key_prefix: usize,
    pub foreign_key_prefix: usize,
    pub kind: JoinKind,
    /// Conjuncts of ON that are not equations, evaluated over the joined row
    pub predicate: Option<TypedExpr>,
    /// Every foreign column in schema order; USING columns map onto the left side
    pub foreign_columns: Vec<ColumnMapping>,
    /// Foreign schema positions whose values are appended to the joined row
    pub appended: Vec<usize>,
}

impl JoinClause {
    pub fn is_left(&self) -> bool {
        self.kind == JoinKind::Left
    }

    /// Foreign schema column behind a joined-namespace name
    pub fn foreign_column(&self, name: &str) -> Option<&ColumnMapping> {
        self.foreign_columns.iter().find(|c| c.name == name)
    }

    /// Names of the foreign columns appended to the joined row
    pub fn appended_names(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.appended.iter().map(|index| &self.foreign_columns[*index])
    }

    /// Joined-namespace columns this clause needs to be present
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for (self_expr, _) in &self.equations {
            names.extend(self_expr.references());
        }
        if let Some(predicate) = &self.predicate {
            let own: BTreeSet<_> = self.appended_names().map(|c| c.name.clone()).collect();
            names.extend(predicate.references().into_iter().filter(|name| !own.contains(name)));
        }
        names
    }
}

/// Prepared query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: Uuid,
    pub table_path: String,
    pub object_id: Uuid,
    pub schema: Arc<TableSchema>,
    pub alias: Option<String>,
    /// Primary table columns in schema order
    pub self_columns: Vec<ColumnMapping>,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<TypedExpr>,
    pub group: Option<GroupClause>,
    pub having: Option<TypedExpr>,
    pub order: Option<OrderClause>,
    pub projection: Vec<NamedItem>,
    pub offset: u64,
    pub limit: Option<u64>,
    /// Rows must be produced in key order
    pub ordered_scan: bool,
}

impl Query {
    pub fn output_names(&self) -> Vec<String> {
        self.projection.iter().map(|item| item.name.clone()).collect()
    }

    pub fn output_types(&self) -> Vec<ValueType> {
        self.projection.iter().map(|item| item.expr.ty).collect()
    }

    /// Primary-table schema position of a joined-namespace name
    pub fn self_column(&self, name: &str) -> Option<&ColumnMapping> {
        self.self_columns.iter().find(|c| c.name == name)
    }

    /// Order in which joins are applied: source order, with each run of
    /// mutually independent clauses sorted by `key`
    pub fn canonical_join_order<K: Ord>(&self, key: impl Fn(&JoinClause) -> K) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.joins.len());
        let mut run: Vec<usize> = Vec::new();
        let mut run_columns: BTreeSet<String> = BTreeSet::new();

        for (index, join) in self.joins.iter().enumerate() {
            let depends = join.dependencies().iter().any(|name| run_columns.contains(name));
            if depends {
                run.sort_by_key(|i| key(&self.joins[*i]));
                order.append(&mut run);
                run_columns.clear();
            }
            run.push(index);
            run_columns.extend(join.appended_names().map(|c| c.name.clone()));
        }
        run.sort_by_key(|i| key(&self.joins[*i]));
        order.append(&mut run);
        order
    }
}
