//! Query preparation
//!
//! Binds a parsed query to the schemas of its tables and produces a typed
//! `Query`. Sources are added to the namespace left to right, so a join
//! condition sees the primary table and every earlier join.
//!
//! Scoping rules:
//! - WHERE, JOIN conditions and GROUP BY are bound over source columns
//! - with GROUP BY, projection, HAVING and ORDER BY are bound over group
//!   items and aggregates; any source column they read must be grouped
//! - GROUP BY aliases are visible in projection, HAVING and ORDER BY,
//!   projection aliases in HAVING and ORDER BY

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use uuid::Uuid;

use super::bounds;
use super::errors::{PrepareError, PrepareResult};
use super::expr::{ExprKind, TypedExpr};
use super::keys;
use super::namespace::Namespace;
use super::query::{
    AggregateItem, ColumnMapping, GroupClause, JoinClause, JoinKind, NamedItem, OrderClause, OrderItem, Query,
};
use crate::config::QueryOptions;
use crate::functions::{AggregateFunction, FunctionDescriptor, FunctionRegistry, ResolvedSignature, Signature};
use crate::parser::{
    self, BinaryOp, Expr, JoinAst, JoinCondition, NamedExpr, Placeholders, Projection, QueryAst, TableRef, TotalsMode,
    UnaryOp,
};
use crate::schema::{DataSplit, TableSchema};
use crate::value::{Value, ValueType};

/// Source of table schemas and split metadata
pub trait SplitProvider: Send + Sync {
    /// Split describing the whole table at `path`
    fn get_initial_split<'a>(&'a self, path: &'a str) -> BoxFuture<'a, PrepareResult<DataSplit>>;
}

/// Parses and prepares a query
pub async fn prepare(
    source: &str,
    provider: &dyn SplitProvider,
    placeholders: &Placeholders,
    registry: &FunctionRegistry,
    options: &QueryOptions,
) -> PrepareResult<Query> {
    let ast = parser::parse_query(source, placeholders, options.max_expression_depth)?;

    let primary = fetch_split(provider, &ast.from).await?;
    let mut foreign = Vec::with_capacity(ast.joins.len());
    for join in &ast.joins {
        foreign.push(fetch_split(provider, &join.table).await?);
    }

    Preparer::new(registry, options.max_expression_depth).build(ast, primary, foreign)
}

async fn fetch_split(provider: &dyn SplitProvider, table: &TableRef) -> PrepareResult<DataSplit> {
    provider
        .get_initial_split(&table.path)
        .await
        .map_err(|e| match e.position() {
            Some(_) => e,
            None => e.with_position(table.position),
        })
}

/// Prepares `<projection> [WHERE <predicate>]` over a single row source
pub fn prepare_job_query(
    source: &str,
    schema: Arc<TableSchema>,
    registry: &FunctionRegistry,
    options: &QueryOptions,
) -> PrepareResult<Query> {
    let job = parser::parse_job_query(source, options.max_expression_depth)?;
    let ast = QueryAst {
        projection: job.projection,
        from: TableRef {
            path: String::new(),
            alias: None,
            position: 0,
        },
        joins: Vec::new(),
        where_clause: job.where_clause,
        group_by: None,
        totals: TotalsMode::None,
        having: None,
        order_by: Vec::new(),
        offset: None,
        limit: None,
    };
    let split = DataSplit::new(Uuid::nil(), schema);
    let mut query = Preparer::new(registry, options.max_expression_depth).build(ast, split, Vec::new())?;
    // rows of a job are consumed as they come
    query.ordered_scan = false;
    Ok(query)
}

/// Binds an expression over the columns of `schema`; references keep the
/// schema column names
pub fn bind_standalone_expression(
    source: &str,
    schema: &TableSchema,
    registry: &FunctionRegistry,
    max_depth: usize,
) -> PrepareResult<TypedExpr> {
    let expr = parser::parse_expression(source, max_depth)?;
    let mut preparer = Preparer::new(registry, max_depth);
    preparer.namespace.add_source("", None, schema, &HashMap::new())?;
    let bound = preparer.bind(&expr, &mut Scope::source(AggregateContext::Expression))?;
    preparer.check_depth(&bound)?;
    Ok(bound)
}

/// Where an aggregate call was met outside of a grouped scope
#[derive(Debug, Clone, Copy)]
enum AggregateContext {
    Where,
    JoinCondition,
    GroupBy,
    Nested,
    NoGroupBy,
    Expression,
}

impl AggregateContext {
    fn error(&self, function: &str) -> PrepareError {
        let place = match self {
            AggregateContext::Where => "is not allowed in WHERE",
            AggregateContext::JoinCondition => "is not allowed in JOIN condition",
            AggregateContext::GroupBy => "is not allowed in GROUP BY",
            AggregateContext::Nested => "is nested in another aggregate",
            AggregateContext::NoGroupBy => "is used without GROUP BY",
            AggregateContext::Expression => "is not allowed here",
        };
        PrepareError::aggregate_misuse(format!("aggregate function \"{}\" {}", function, place))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AliasVisibility {
    None,
    Group,
    All,
}

#[derive(Debug, Default)]
struct GroupScope {
    items: Vec<NamedItem>,
    aggregates: Vec<AggregateItem>,
}

struct Scope<'g> {
    group: Option<&'g mut GroupScope>,
    aliases: AliasVisibility,
    aggregates: AggregateContext,
}

impl Scope<'_> {
    fn source(aggregates: AggregateContext) -> Scope<'static> {
        Scope {
            group: None,
            aliases: AliasVisibility::None,
            aggregates,
        }
    }
}

struct Preparer<'a> {
    registry: &'a FunctionRegistry,
    max_depth: usize,
    namespace: Namespace,
    group_aliases: HashMap<String, TypedExpr>,
    projection_aliases: HashMap<String, TypedExpr>,
}

fn mismatch(expr: &Expr) -> PrepareError {
    PrepareError::type_mismatch(format!("Type mismatch in expression \"{}\"", expr))
}

fn scalar_expected(expr: &Expr) -> PrepareError {
    PrepareError::type_mismatch(format!("Expecting scalar expression, got \"{}\"", expr))
}

/// Literal converted to `target` without loss
fn coerce_literal(expr: &TypedExpr, target: ValueType) -> Option<TypedExpr> {
    let value = expr.as_literal()?.coerce_lossless(target)?;
    Some(TypedExpr::new(ExprKind::Literal(value), target))
}

/// Brings two operands to one type, adjusting a literal side if needed
fn unify(lhs: TypedExpr, rhs: TypedExpr) -> Option<(TypedExpr, TypedExpr)> {
    if lhs.ty == rhs.ty {
        return Some((lhs, rhs));
    }
    if let Some(lhs) = coerce_literal(&lhs, rhs.ty) {
        return Some((lhs, rhs));
    }
    if let Some(rhs) = coerce_literal(&rhs, lhs.ty) {
        return Some((lhs, rhs));
    }
    None
}

/// Fits a tuple element to an argument type; numerics may stay wider
fn coerce_value(value: &Value, target: ValueType) -> Option<Value> {
    if value.is_null() || target == ValueType::Null || value.value_type() == target {
        return Some(value.clone());
    }
    value
        .coerce_lossless(target)
        .or_else(|| (value.value_type().is_numeric() && target.is_numeric()).then(|| value.clone()))
}

fn is_boolean(ty: ValueType) -> bool {
    matches!(ty, ValueType::Boolean | ValueType::Null)
}

impl<'a> Preparer<'a> {
    fn new(registry: &'a FunctionRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
            namespace: Namespace::new(),
            group_aliases: HashMap::new(),
            projection_aliases: HashMap::new(),
        }
    }

    fn build(mut self, ast: QueryAst, primary: DataSplit, foreign: Vec<DataSplit>) -> PrepareResult<Query> {
        let schema = primary.schema.clone();
        let self_columns =
            self.namespace
                .add_source(&ast.from.path, ast.from.alias.as_deref(), &schema, &HashMap::new())?;

        let mut joins = Vec::with_capacity(ast.joins.len());
        let mut common_prefix = schema.key_column_count();
        for (join, split) in ast.joins.iter().zip(foreign) {
            let clause = self.bind_join(join, split, &schema, &self_columns, common_prefix)?;
            common_prefix = clause.common_key_prefix;
            joins.push(clause);
        }

        let where_clause = match &ast.where_clause {
            Some(expr) => Some(self.bind_predicate(expr, &mut Scope::source(AggregateContext::Where))?),
            None => None,
        };

        let mut group_scope = match &ast.group_by {
            Some(items) => Some(self.bind_group_items(items)?),
            None => None,
        };
        let projection_context = if group_scope.is_some() {
            AggregateContext::Nested
        } else {
            AggregateContext::NoGroupBy
        };

        let projection = {
            let mut scope = Scope {
                group: group_scope.as_mut(),
                aliases: AliasVisibility::Group,
                aggregates: projection_context,
            };
            self.bind_projection(&ast.projection, &mut scope)?
        };

        let having = match &ast.having {
            Some(expr) => {
                if group_scope.is_none() {
                    return Err(PrepareError::aggregate_misuse("HAVING is used without GROUP BY"));
                }
                let mut scope = Scope {
                    group: group_scope.as_mut(),
                    aliases: AliasVisibility::All,
                    aggregates: projection_context,
                };
                Some(self.bind_predicate(expr, &mut scope)?)
            }
            None => None,
        };

        let mut order_items = Vec::with_capacity(ast.order_by.len());
        for item in &ast.order_by {
            let mut scope = Scope {
                group: group_scope.as_mut(),
                aliases: AliasVisibility::All,
                aggregates: projection_context,
            };
            let expr = self.bind(&item.expr, &mut scope)?;
            self.check_depth(&expr)?;
            order_items.push(OrderItem {
                expr,
                descending: item.descending,
            });
        }

        bounds::check_limit(!order_items.is_empty(), ast.offset.is_some(), ast.limit)?;

        let group = group_scope.map(|scope| {
            let (covered, in_prefix) = keys::group_key_coverage(&scope.items, &schema, &self_columns);
            GroupClause {
                group_items: scope.items,
                aggregate_items: scope.aggregates,
                common_prefix_with_primary_key: in_prefix,
                use_disjoint_group_by: covered == schema.key_column_count() && covered > 0,
                totals_mode: ast.totals,
            }
        });

        let mut ordered_scan = false;
        let order = if order_items.is_empty() {
            ordered_scan = group.is_none() && ast.limit.is_some();
            None
        } else if group.is_none() && keys::order_follows_key(&order_items, &schema, &self_columns) {
            ordered_scan = true;
            None
        } else {
            Some(OrderClause { items: order_items })
        };

        Ok(Query {
            id: Uuid::new_v4(),
            table_path: ast.from.path,
            object_id: primary.object_id,
            schema,
            alias: ast.from.alias,
            self_columns,
            joins,
            where_clause,
            group,
            having,
            order,
            projection,
            offset: ast.offset.unwrap_or(0),
            limit: ast.limit,
            ordered_scan,
        })
    }

    fn bind_join(
        &mut self,
        join: &JoinAst,
        split: DataSplit,
        primary_schema: &TableSchema,
        self_columns: &[ColumnMapping],
        previous_prefix: usize,
    ) -> PrepareResult<JoinClause> {
        let foreign_schema = split.schema.clone();
        let alias = join.table.alias.as_deref();

        let (foreign_columns, equations, predicate) = match &join.condition {
            JoinCondition::Using(columns) => {
                let mut merged = HashMap::new();
                let mut pairs = Vec::with_capacity(columns.len());
                for column in columns {
                    let left = self.namespace.resolve_using(column)?;
                    let index = foreign_schema
                        .find_column(column)
                        .ok_or_else(|| PrepareError::unresolved_reference(column))?;
                    let foreign_type = foreign_schema.column(index).value_type();
                    if foreign_type != left.ty {
                        return Err(PrepareError::type_mismatch(format!(
                            "Type mismatch in join equation \"{}\": {} and {}",
                            column, left.ty, foreign_type
                        )));
                    }
                    pairs.push((left.name.clone(), left.ty));
                    merged.insert(column.clone(), left);
                }
                let foreign_columns =
                    self.namespace
                        .add_source(&join.table.path, alias, &foreign_schema, &merged)?;
                let equations = pairs
                    .into_iter()
                    .map(|(name, ty)| (TypedExpr::reference(name.clone(), ty), TypedExpr::reference(name, ty)))
                    .collect();
                (foreign_columns, equations, None)
            }
            JoinCondition::On(expr) => {
                let foreign_columns =
                    self.namespace
                        .add_source(&join.table.path, alias, &foreign_schema, &HashMap::new())?;
                let bound = self.bind_predicate(expr, &mut Scope::source(AggregateContext::JoinCondition))?;
                let own: BTreeSet<String> = foreign_columns.iter().map(|c| c.name.clone()).collect();
                let (equations, residual) = split_join_condition(&bound, &own)?;
                (foreign_columns, equations, TypedExpr::and_all(residual))
            }
        };

        let appended = foreign_columns
            .iter()
            .enumerate()
            .filter(|(_, c)| match &join.condition {
                JoinCondition::Using(columns) => !columns.contains(&c.column),
                JoinCondition::On(_) => true,
            })
            .map(|(index, _)| index)
            .collect();

        let foreign_key_prefix = keys::foreign_key_prefix(&equations, &foreign_schema, &foreign_columns);
        let common_key_prefix = keys::common_key_prefix(
            &equations,
            primary_schema,
            self_columns,
            &foreign_schema,
            &foreign_columns,
            previous_prefix,
            foreign_key_prefix,
        );

        Ok(JoinClause {
            foreign_path: join.table.path.clone(),
            foreign_object_id: split.object_id,
            foreign_schema,
            foreign_alias: join.table.alias.clone(),
            equations,
            common_key_prefix,
            foreign_key_prefix,
            kind: if join.is_left { JoinKind::Left } else { JoinKind::Inner },
            predicate,
            foreign_columns,
            appended,
        })
    }

    fn bind_group_items(&mut self, items: &[NamedExpr]) -> PrepareResult<GroupScope> {
        let mut scope = GroupScope::default();
        for item in items {
            let expr = self.bind(&item.expr, &mut Scope::source(AggregateContext::GroupBy))?;
            self.check_depth(&expr)?;
            let name = item.output_name();
            if scope.items.iter().any(|existing| existing.name == name) {
                return Err(PrepareError::alias_collision(&name));
            }
            if let Some(alias) = &item.alias {
                self.group_aliases
                    .insert(alias.clone(), TypedExpr::reference(name.clone(), expr.ty));
            }
            scope.items.push(NamedItem::new(expr, name));
        }
        Ok(scope)
    }

    fn bind_projection(&mut self, projection: &Projection, scope: &mut Scope<'_>) -> PrepareResult<Vec<NamedItem>> {
        let mut items: Vec<NamedItem> = Vec::new();
        match projection {
            Projection::Star => {
                for (name, display, ty) in self.namespace.star()? {
                    let expr = TypedExpr::reference(name, ty);
                    let expr = match scope.group.as_deref() {
                        Some(group) => ground_reference(expr, group)?,
                        None => expr,
                    };
                    items.push(NamedItem::new(expr, display));
                }
            }
            Projection::Items(named) => {
                let mut aliases = Vec::new();
                for item in named {
                    let expr = self.bind(&item.expr, scope)?;
                    self.check_depth(&expr)?;
                    if expr.ty == ValueType::Null {
                        return Err(PrepareError::type_mismatch(format!(
                            "Type inference failed for \"{}\"",
                            item.expr
                        )));
                    }
                    let name = item.output_name();
                    if items.iter().any(|existing| existing.name == name) {
                        return Err(PrepareError::alias_collision(&name));
                    }
                    if let Some(alias) = &item.alias {
                        aliases.push((alias.clone(), expr.clone()));
                    }
                    items.push(NamedItem::new(expr, name));
                }
                self.projection_aliases.extend(aliases);
            }
        }
        Ok(items)
    }

    fn bind_predicate(&self, expr: &Expr, scope: &mut Scope<'_>) -> PrepareResult<TypedExpr> {
        let bound = self.bind(expr, scope)?;
        self.check_depth(&bound)?;
        if !is_boolean(bound.ty) {
            return Err(PrepareError::type_mismatch(format!(
                "Type mismatch in expression \"{}\": expected boolean, got {}",
                expr, bound.ty
            )));
        }
        Ok(bound)
    }

    fn check_depth(&self, expr: &TypedExpr) -> PrepareResult<()> {
        bounds::check_depth(expr, self.max_depth)
    }

    fn alias(&self, name: &str, visibility: AliasVisibility) -> Option<&TypedExpr> {
        if visibility >= AliasVisibility::All {
            if let Some(expr) = self.projection_aliases.get(name) {
                return Some(expr);
            }
        }
        if visibility >= AliasVisibility::Group {
            return self.group_aliases.get(name);
        }
        None
    }

    fn contains_aggregate(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(_) | Expr::Reference(_) => false,
            Expr::Function { name, args } => {
                self.registry.is_aggregate(name) || args.iter().any(|arg| self.contains_aggregate(arg))
            }
            Expr::Unary { operand, .. } => self.contains_aggregate(operand),
            Expr::Binary { lhs, rhs, .. } => self.contains_aggregate(lhs) || self.contains_aggregate(rhs),
            Expr::Tuple(args) | Expr::In { args, .. } | Expr::Between { args, .. } => {
                args.iter().any(|arg| self.contains_aggregate(arg))
            }
            Expr::Transform { args, default, .. } => {
                args.iter().any(|arg| self.contains_aggregate(arg))
                    || default.as_deref().map_or(false, |d| self.contains_aggregate(d))
            }
        }
    }

    fn mentions_alias(&self, expr: &Expr, visibility: AliasVisibility) -> bool {
        match expr {
            Expr::Literal(_) => false,
            Expr::Reference(column) => column.table.is_none() && self.alias(&column.name, visibility).is_some(),
            Expr::Function { args, .. } | Expr::Tuple(args) | Expr::In { args, .. } | Expr::Between { args, .. } => {
                args.iter().any(|arg| self.mentions_alias(arg, visibility))
            }
            Expr::Unary { operand, .. } => self.mentions_alias(operand, visibility),
            Expr::Binary { lhs, rhs, .. } => {
                self.mentions_alias(lhs, visibility) || self.mentions_alias(rhs, visibility)
            }
            Expr::Transform { args, default, .. } => {
                args.iter().any(|arg| self.mentions_alias(arg, visibility))
                    || default.as_deref().map_or(false, |d| self.mentions_alias(d, visibility))
            }
        }
    }

    fn bind(&self, expr: &Expr, scope: &mut Scope<'_>) -> PrepareResult<TypedExpr> {
        if let Expr::Reference(column) = expr {
            if column.table.is_none() {
                if let Some(aliased) = self.alias(&column.name, scope.aliases) {
                    return Ok(aliased.clone());
                }
            }
        }

        let grouped = scope.group.is_some();
        if grouped && !self.contains_aggregate(expr) && !self.mentions_alias(expr, scope.aliases) {
            let mut source_scope = Scope::source(scope.aggregates);
            if let Ok(bound) = self.bind(expr, &mut source_scope) {
                if let Some(group) = scope.group.as_deref() {
                    if let Some(item) = group.items.iter().find(|item| item.expr == bound) {
                        return Ok(TypedExpr::reference(item.name.clone(), bound.ty));
                    }
                }
                match bound.kind {
                    ExprKind::Literal(_) => return Ok(bound),
                    ExprKind::Reference(_) => return Err(not_grouped(expr)),
                    _ => {}
                }
            }
        }

        match expr {
            Expr::Literal(value) => Ok(TypedExpr::literal(value.clone())),
            Expr::Reference(column) => {
                let (name, ty) = self.namespace.resolve(column)?;
                if grouped {
                    return Err(not_grouped(expr));
                }
                Ok(TypedExpr::reference(name, ty))
            }
            Expr::Tuple(_) => Err(scalar_expected(expr)),
            Expr::Function { name, args } => self.bind_function(name, args, expr, scope),
            Expr::Unary { op, operand } => self.bind_unary(*op, operand, expr, scope),
            Expr::Binary { op, lhs, rhs } if op.is_relational() => self.bind_relational(*op, lhs, rhs, expr, scope),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.bind(lhs, scope)?;
                let rhs = self.bind(rhs, scope)?;
                self.binary(*op, lhs, rhs, expr)
            }
            Expr::In { args, values } => {
                let args = self.bind_all(args, scope)?;
                let types: Vec<ValueType> = args.iter().map(|a| a.ty).collect();
                let values = values
                    .iter()
                    .map(|tuple| coerce_tuple(tuple, &types, false, expr))
                    .collect::<PrepareResult<Vec<_>>>()?;
                Ok(TypedExpr::new(ExprKind::In { args, values }, ValueType::Boolean))
            }
            Expr::Between { args, ranges } => {
                let args = self.bind_all(args, scope)?;
                let types: Vec<ValueType> = args.iter().map(|a| a.ty).collect();
                let ranges = ranges
                    .iter()
                    .map(|(lower, upper)| {
                        Ok((
                            coerce_tuple(lower, &types, true, expr)?,
                            coerce_tuple(upper, &types, true, expr)?,
                        ))
                    })
                    .collect::<PrepareResult<Vec<_>>>()?;
                Ok(TypedExpr::new(ExprKind::Between { args, ranges }, ValueType::Boolean))
            }
            Expr::Transform {
                args,
                from,
                to,
                default,
            } => self.bind_transform(args, from, to, default.as_deref(), expr, scope),
        }
    }

    fn bind_all(&self, args: &[Expr], scope: &mut Scope<'_>) -> PrepareResult<Vec<TypedExpr>> {
        args.iter().map(|arg| self.bind(arg, scope)).collect()
    }

    fn bind_function(&self, name: &str, args: &[Expr], expr: &Expr, scope: &mut Scope<'_>) -> PrepareResult<TypedExpr> {
        let lower = name.to_ascii_lowercase();
        match self.registry.get(&lower) {
            None => Err(PrepareError::undefined_function(name)),
            Some(FunctionDescriptor::Aggregate(function)) => match scope.group.as_deref_mut() {
                Some(group) => self.bind_aggregate(&lower, function, args, group),
                None => Err(scope.aggregates.error(&lower)),
            },
            Some(FunctionDescriptor::Scalar(function)) => {
                let bound = self.bind_all(args, scope)?;
                let (args, resolved) = resolve_call(&lower, &function.signature, bound, expr)?;
                Ok(TypedExpr::new(ExprKind::Function { name: lower, args }, resolved.result))
            }
        }
    }

    fn bind_aggregate(
        &self,
        name: &str,
        function: &AggregateFunction,
        args: &[Expr],
        group: &mut GroupScope,
    ) -> PrepareResult<TypedExpr> {
        let mut inner = Scope::source(AggregateContext::Nested);
        let bound = self.bind_all(args, &mut inner)?;
        let call = Expr::Function {
            name: name.to_string(),
            args: args.to_vec(),
        };
        let (bound, resolved) = resolve_call(name, &function.signature, bound, &call)?;
        let argument = bound.into_iter().next().ok_or_else(|| mismatch(&call))?;
        self.check_depth(&argument)?;

        let item_name = format!("{}({})", name, argument);
        if !group.aggregates.iter().any(|item| item.name == item_name) {
            group.aggregates.push(AggregateItem {
                function: name.to_string(),
                state_type: function.state_type(argument.ty),
                result_type: resolved.result,
                argument,
                name: item_name.clone(),
            });
        }
        Ok(TypedExpr::reference(item_name, resolved.result))
    }

    fn bind_unary(&self, op: UnaryOp, operand: &Expr, expr: &Expr, scope: &mut Scope<'_>) -> PrepareResult<TypedExpr> {
        let operand = self.bind(operand, scope)?;
        let ok = match op {
            UnaryOp::Plus | UnaryOp::Minus => operand.ty.is_numeric(),
            UnaryOp::BitNot => operand.ty.is_integer(),
            UnaryOp::Not => is_boolean(operand.ty),
        } || operand.ty == ValueType::Null;
        if !ok {
            return Err(mismatch(expr));
        }
        if op == UnaryOp::Plus {
            return Ok(operand);
        }
        let ty = if op == UnaryOp::Not { ValueType::Boolean } else { operand.ty };
        Ok(TypedExpr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        ))
    }

    fn binary(&self, op: BinaryOp, lhs: TypedExpr, rhs: TypedExpr, expr: &Expr) -> PrepareResult<TypedExpr> {
        if op.is_logical() {
            if !is_boolean(lhs.ty) || !is_boolean(rhs.ty) {
                return Err(mismatch(expr));
            }
            return Ok(TypedExpr::binary(op, lhs, rhs, ValueType::Boolean));
        }

        let (lhs, rhs) = unify(lhs, rhs).ok_or_else(|| mismatch(expr))?;
        let ty = if lhs.ty == ValueType::Null { rhs.ty } else { lhs.ty };
        let allowed = if op.is_integral() {
            ty.is_integer()
        } else {
            ty.is_numeric()
        };
        if !allowed && ty != ValueType::Null {
            return Err(mismatch(expr));
        }
        Ok(TypedExpr::binary(op, lhs, rhs, ty))
    }

    fn compare(&self, op: BinaryOp, lhs: TypedExpr, rhs: TypedExpr, expr: &Expr) -> PrepareResult<TypedExpr> {
        let (lhs, rhs) = match unify(lhs.clone(), rhs.clone()) {
            Some(pair) => pair,
            None if lhs.ty.is_comparable_with(rhs.ty) => (lhs, rhs),
            None => return Err(mismatch(expr)),
        };
        if matches!(lhs.ty, ValueType::Any) || matches!(rhs.ty, ValueType::Any) {
            if op != BinaryOp::Equal && op != BinaryOp::NotEqual {
                return Err(mismatch(expr));
            }
        }
        Ok(TypedExpr::binary(op, lhs, rhs, ValueType::Boolean))
    }

    /// Relational operators; tuple operands compare lexicographically
    fn bind_relational(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        expr: &Expr,
        scope: &mut Scope<'_>,
    ) -> PrepareResult<TypedExpr> {
        let is_tuple = |e: &Expr| matches!(e, Expr::Tuple(_));
        if !is_tuple(lhs) && !is_tuple(rhs) {
            let l = self.bind(lhs, scope)?;
            let r = self.bind(rhs, scope)?;
            return self.compare(op, l, r, expr);
        }

        let left = lhs.clone().into_items();
        let right = rhs.clone().into_items();
        if left.len() != right.len() {
            return Err(PrepareError::type_mismatch(format!(
                "Type mismatch in expression \"{}\": tuples have different length",
                expr
            )));
        }
        let mut pairs = Vec::with_capacity(left.len());
        for (l, r) in left.iter().zip(&right) {
            pairs.push((self.bind(l, scope)?, self.bind(r, scope)?));
        }

        match op {
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let parts = pairs
                    .into_iter()
                    .map(|(l, r)| self.compare(op, l, r, expr))
                    .collect::<PrepareResult<Vec<_>>>()?;
                let combined = if op == BinaryOp::Equal {
                    TypedExpr::and_all(parts)
                } else {
                    TypedExpr::or_all(parts)
                };
                combined.ok_or_else(|| mismatch(expr))
            }
            _ => {
                let strict = match op {
                    BinaryOp::Less | BinaryOp::LessOrEqual => BinaryOp::Less,
                    _ => BinaryOp::Greater,
                };
                let mut pairs = pairs.into_iter().rev();
                let (l, r) = pairs.next().ok_or_else(|| mismatch(expr))?;
                let mut result = self.compare(op, l, r, expr)?;
                for (l, r) in pairs {
                    let less = self.compare(strict, l.clone(), r.clone(), expr)?;
                    let equal = self.compare(BinaryOp::Equal, l, r, expr)?;
                    let tail = TypedExpr::binary(BinaryOp::And, equal, result, ValueType::Boolean);
                    result = TypedExpr::binary(BinaryOp::Or, less, tail, ValueType::Boolean);
                }
                Ok(result)
            }
        }
    }

    fn bind_transform(
        &self,
        args: &[Expr],
        from: &[Vec<Value>],
        to: &[Value],
        default: Option<&Expr>,
        expr: &Expr,
        scope: &mut Scope<'_>,
    ) -> PrepareResult<TypedExpr> {
        let args = self.bind_all(args, scope)?;
        let types: Vec<ValueType> = args.iter().map(|a| a.ty).collect();
        if from.len() != to.len() {
            return Err(PrepareError::type_mismatch(format!(
                "Type mismatch in expression \"{}\": {} source tuples for {} results",
                expr,
                from.len(),
                to.len()
            )));
        }
        let from = from
            .iter()
            .map(|tuple| coerce_tuple(tuple, &types, false, expr))
            .collect::<PrepareResult<Vec<_>>>()?;

        let mut ty = to
            .iter()
            .map(Value::value_type)
            .find(|ty| *ty != ValueType::Null)
            .unwrap_or(ValueType::Null);
        let mut to = to
            .iter()
            .map(|value| match value.coerce_lossless(ty) {
                Some(coerced) => Ok(coerced),
                None => Err(mismatch(expr)),
            })
            .collect::<PrepareResult<Vec<_>>>()?;

        let default = match default {
            Some(default) => {
                let mut bound = self.bind(default, scope)?;
                if ty == ValueType::Null {
                    ty = bound.ty;
                    to = to
                        .into_iter()
                        .map(|value| value.coerce_lossless(ty).ok_or_else(|| mismatch(expr)))
                        .collect::<PrepareResult<Vec<_>>>()?;
                } else if bound.ty != ty && bound.ty != ValueType::Null {
                    bound = coerce_literal(&bound, ty).ok_or_else(|| mismatch(expr))?;
                }
                Some(Box::new(bound))
            }
            None => None,
        };

        Ok(TypedExpr::new(
            ExprKind::Transform {
                args,
                from,
                to,
                default,
            },
            ty,
        ))
    }
}

fn not_grouped(expr: &Expr) -> PrepareError {
    PrepareError::aggregate_misuse(format!(
        "column \"{}\" must appear in GROUP BY or be used in an aggregate function",
        expr
    ))
}

/// A star column in a grouped query must be a group item
fn ground_reference(expr: TypedExpr, group: &GroupScope) -> PrepareResult<TypedExpr> {
    match group.items.iter().find(|item| item.expr == expr) {
        Some(item) => Ok(TypedExpr::reference(item.name.clone(), expr.ty)),
        None => Err(PrepareError::aggregate_misuse(format!(
            "column \"{}\" must appear in GROUP BY or be used in an aggregate function",
            expr
        ))),
    }
}

fn coerce_tuple(values: &[Value], types: &[ValueType], prefix: bool, expr: &Expr) -> PrepareResult<Vec<Value>> {
    let fits = values.len() == types.len() || (prefix && !values.is_empty() && values.len() < types.len());
    if !fits {
        return Err(PrepareError::type_mismatch(format!(
            "Type mismatch in expression \"{}\": expected {} values, got {}",
            expr,
            types.len(),
            values.len()
        )));
    }
    values
        .iter()
        .zip(types)
        .map(|(value, ty)| coerce_value(value, *ty).ok_or_else(|| mismatch(expr)))
        .collect()
}

fn resolve_call(
    name: &str,
    signature: &Signature,
    args: Vec<TypedExpr>,
    expr: &Expr,
) -> PrepareResult<(Vec<TypedExpr>, ResolvedSignature)> {
    let types: Vec<ValueType> = args.iter().map(|a| a.ty).collect();
    let literal: Vec<bool> = args.iter().map(|a| a.as_literal().is_some()).collect();
    let resolved = signature
        .infer(&types, &literal)
        .map_err(|e| PrepareError::type_mismatch(format!("Type mismatch in function \"{}\": {}", name, e)))?;

    let args = args
        .into_iter()
        .zip(&resolved.arg_types)
        .map(|(arg, ty)| {
            if arg.ty == *ty || *ty == ValueType::Any {
                Ok(arg)
            } else {
                coerce_literal(&arg, *ty).ok_or_else(|| mismatch(expr))
            }
        })
        .collect::<PrepareResult<Vec<_>>>()?;
    Ok((args, resolved))
}

/// Splits a bound ON condition into key equations and residual conjuncts.
///
/// A conjunct `l = r` is an equation when one side reads only columns of the
/// joined table and the other reads none of them.
fn split_join_condition(
    condition: &TypedExpr,
    own: &BTreeSet<String>,
) -> PrepareResult<(Vec<(TypedExpr, TypedExpr)>, Vec<TypedExpr>)> {
    let mut equations = Vec::new();
    let mut residual = Vec::new();
    for conjunct in condition.conjuncts() {
        if let ExprKind::Binary {
            op: BinaryOp::Equal,
            lhs,
            rhs,
        } = &conjunct.kind
        {
            let only_own = |e: &TypedExpr| {
                let refs = e.references();
                !refs.is_empty() && refs.iter().all(|r| own.contains(r))
            };
            let none_own = |e: &TypedExpr| e.references().iter().all(|r| !own.contains(r));
            let pair = if only_own(rhs) && none_own(lhs) {
                Some(((**lhs).clone(), (**rhs).clone()))
            } else if only_own(lhs) && none_own(rhs) {
                Some(((**rhs).clone(), (**lhs).clone()))
            } else {
                None
            };
            if let Some((self_expr, foreign_expr)) = pair {
                if self_expr.ty != foreign_expr.ty {
                    return Err(PrepareError::type_mismatch(format!(
                        "Type mismatch in join equation \"{}\": {} and {}",
                        conjunct, self_expr.ty, foreign_expr.ty
                    )));
                }
                equations.push((self_expr, foreign_expr));
                continue;
            }
        }
        residual.push(conjunct.clone());
    }
    Ok((equations, residual))
}
