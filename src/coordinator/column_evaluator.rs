//! Column evaluator cache
//!
//! Computed key columns are compiled once per schema and shared by every
//! pruning pass over tables with that schema.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::error::{QueryError, QueryResult};
use crate::evaluator::{compile_expr, CompiledExpr, EvaluationResult, Layout};
use crate::functions::FunctionRegistry;
use crate::parser::BinaryOp;
use crate::planner::{bind_standalone_expression, ExprKind, TypedExpr};
use crate::schema::TableSchema;
use crate::value::{Value, ValueType};

/// Compiled expression of one computed column
pub struct ComputedColumn {
    pub index: usize,
    /// Schema positions the expression reads
    pub references: Vec<usize>,
    pub ty: ValueType,
    /// `x % N` with a literal `N`: type of the result and `N`
    pub modulo: Option<(ValueType, u64)>,
    evaluator: CompiledExpr,
}

impl ComputedColumn {
    /// Finite value set of a modulo column, nulls first
    pub fn modulo_domain(&self) -> Option<Vec<Value>> {
        let (ty, divisor) = self.modulo?;
        let mut values = vec![Value::Null];
        match ty {
            ValueType::Int64 => {
                let bound = (divisor - 1).min(i64::MAX as u64) as i64;
                values.extend((-bound..=bound).map(Value::Int64));
            }
            ValueType::Uint64 => values.extend((0..divisor).map(Value::Uint64)),
            _ => return None,
        }
        Some(values.into_iter().filter_map(|v| v.coerce_lossless(self.ty)).collect())
    }

    /// Evaluates over a full-width row
    pub fn evaluate(&self, row: &[Value]) -> EvaluationResult<Value> {
        let value = (self.evaluator)(row)?;
        Ok(value.coerce_lossless(self.ty).unwrap_or(value))
    }
}

/// All computed columns of one schema
pub struct ColumnEvaluators {
    width: usize,
    computed: HashMap<usize, ComputedColumn>,
}

impl ColumnEvaluators {
    pub fn build(schema: &TableSchema, registry: &FunctionRegistry, max_depth: usize) -> QueryResult<Self> {
        let layout = Layout::new(schema.columns().iter().map(|c| c.name.clone()));
        let mut computed = HashMap::new();
        for (index, column) in schema.columns().iter().enumerate() {
            let Some(source) = &column.expression else { continue };
            let expr = bind_standalone_expression(source, schema, registry, max_depth)?;
            let references = expr
                .references()
                .iter()
                .filter_map(|name| schema.find_column(name))
                .collect();
            computed.insert(
                index,
                ComputedColumn {
                    index,
                    references,
                    ty: column.value_type(),
                    modulo: modulo_of(&expr),
                    evaluator: compile_expr(&expr, &layout, registry)?,
                },
            );
        }
        Ok(Self {
            width: schema.len(),
            computed,
        })
    }

    pub fn get(&self, index: usize) -> Option<&ComputedColumn> {
        self.computed.get(&index)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.computed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computed.is_empty()
    }
}

fn modulo_of(expr: &TypedExpr) -> Option<(ValueType, u64)> {
    let ExprKind::Binary {
        op: BinaryOp::Modulo,
        rhs,
        ..
    } = &expr.kind
    else {
        return None;
    };
    let divisor = match rhs.as_literal()? {
        Value::Int64(v) if *v > 0 => *v as u64,
        Value::Uint64(v) if *v > 0 => *v,
        _ => return None,
    };
    Some((expr.ty, divisor))
}

#[derive(Default)]
struct Entries {
    evaluators: HashMap<String, Arc<ColumnEvaluators>>,
    order: VecDeque<String>,
}

/// Bounded map from schema fingerprint to compiled column evaluators
pub struct ColumnEvaluatorCache {
    registry: Arc<FunctionRegistry>,
    capacity: usize,
    max_depth: usize,
    entries: RwLock<Entries>,
}

impl ColumnEvaluatorCache {
    pub fn new(registry: Arc<FunctionRegistry>, capacity: usize, max_depth: usize) -> Self {
        Self {
            registry,
            capacity: capacity.max(1),
            max_depth,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn get(&self, schema: &TableSchema) -> QueryResult<Arc<ColumnEvaluators>> {
        let key = schema.fingerprint();
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| QueryError::catalog("Column evaluator cache lock poisoned"))?;
            if let Some(evaluators) = entries.evaluators.get(&key) {
                return Ok(evaluators.clone());
            }
        }

        let evaluators = Arc::new(ColumnEvaluators::build(schema, &self.registry, self.max_depth)?);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| QueryError::catalog("Column evaluator cache lock poisoned"))?;
        if let Some(existing) = entries.evaluators.get(&key) {
            return Ok(existing.clone());
        }
        while entries.order.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.evaluators.remove(&oldest);
            }
        }
        entries.order.push_back(key.clone());
        entries.evaluators.insert(key, evaluators.clone());
        Ok(evaluators)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.evaluators.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
