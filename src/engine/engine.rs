//! Query engine
//!
//! Ties the stages together over an in-memory catalog:
//! prepare → prune → fragment scans → evaluation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use super::catalog::Catalog;
use super::fragments::{FragmentScan, FragmentSettings};
use super::lookup::CatalogLookup;
use crate::config::EngineConfig;
use crate::coordinator::{ColumnEvaluatorCache, Coordinator, JoinStrategy};
use crate::error::{QueryError, QueryResult};
use crate::evaluator::{fingerprint, CompiledQueryCache, Evaluator, JoinInput, QueryStatistics};
use crate::functions::{FunctionRegistry, UdfDescriptor};
use crate::observability::{
    log_event_with_fields, Event, MetricsRegistry, MetricsSnapshot, ObservationScope,
};
use crate::parser::Placeholders;
use crate::planner::{prepare, Query, QueryExplain};
use crate::rows::{MemoryTracker, MemoryWriter, Row, RowBuffer};
use crate::schema::KeyRange;

/// Query text with its placeholder values and per-query UDFs
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub source: String,
    pub placeholders: Placeholders,
    pub udfs: Vec<UdfDescriptor>,
}

impl QueryRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_placeholders(mut self, placeholders: Placeholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn with_udfs(mut self, udfs: Vec<UdfDescriptor>) -> Self {
        self.udfs = udfs;
        self
    }
}

/// Ranges one join clause reads from its foreign table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinPlan {
    pub table: String,
    pub strategy: JoinStrategy,
    pub ranges: Vec<KeyRange>,
}

/// Outcome of range pruning for a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrunePlan {
    pub table: String,
    pub ranges: Vec<KeyRange>,
    pub joins: Vec<JoinPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub statistics: QueryStatistics,
}

impl QueryOutput {
    /// Rows as JSON objects keyed by output column name
    pub fn json_rows(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                let object: Map<String, JsonValue> = self
                    .columns
                    .iter()
                    .zip(row.values())
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect();
                JsonValue::Object(object)
            })
            .collect()
    }
}

pub struct Engine {
    config: EngineConfig,
    catalog: Catalog,
    compiled: Arc<CompiledQueryCache>,
    column_evaluators: ColumnEvaluatorCache,
    metrics: MetricsRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig, catalog: Catalog) -> Self {
        let compiled = Arc::new(CompiledQueryCache::new(config.compiled_cache_capacity));
        let column_evaluators = ColumnEvaluatorCache::new(
            catalog.registry().clone(),
            config.column_evaluator_cache_capacity,
            config.query.max_expression_depth,
        );
        let tables = catalog.paths().len().to_string();
        let workers = config.worker_pool_size.to_string();
        log_event_with_fields(
            Event::EngineStarted,
            &[("tables", tables.as_str()), ("workers", workers.as_str())],
        );
        Self {
            config,
            catalog,
            compiled,
            column_evaluators,
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.set_compiled_cache(self.compiled.hits(), self.compiled.misses());
        self.metrics.snapshot()
    }

    /// Catalog registry, extended with the request's UDFs when it has any
    fn registry_for(&self, udfs: &[UdfDescriptor]) -> QueryResult<Arc<FunctionRegistry>> {
        if udfs.is_empty() {
            return Ok(self.catalog.registry().clone());
        }
        let registry = self.catalog.registry().with_udfs(udfs)?;
        for udf in udfs {
            log_event_with_fields(Event::UdfRegistered, &[("name", udf.name.as_str())]);
        }
        Ok(Arc::new(registry))
    }

    pub async fn prepare(&self, request: &QueryRequest) -> QueryResult<Query> {
        let registry = self.registry_for(&request.udfs)?;
        self.prepare_with(request, &registry).await
    }

    async fn prepare_with(&self, request: &QueryRequest, registry: &FunctionRegistry) -> QueryResult<Query> {
        log_event_with_fields(Event::QueryReceived, &[("query", request.source.as_str())]);
        match prepare(
            &request.source,
            &self.catalog,
            &request.placeholders,
            registry,
            &self.config.query,
        )
        .await
        {
            Ok(query) => {
                self.metrics.increment_queries_prepared();
                let joins = query.joins.len().to_string();
                log_event_with_fields(
                    Event::QueryPrepared,
                    &[("joins", joins.as_str()), ("table", query.table_path.as_str())],
                );
                Ok(query)
            }
            Err(err) => {
                self.metrics.increment_queries_rejected();
                let message = err.to_string();
                log_event_with_fields(
                    Event::QueryRejected,
                    &[("code", err.code().code()), ("reason", message.as_str())],
                );
                Err(err.into())
            }
        }
    }

    /// Ranges of every table a prepared query reads
    pub fn plan(&self, query: &Query) -> QueryResult<PrunePlan> {
        let mut buffer = RowBuffer::new(MemoryTracker::new(self.config.query.memory_limit));
        let coordinator = Coordinator::new(&self.column_evaluators, &self.config.query);

        let table = self.catalog.require(&query.table_path)?;
        let ranges = coordinator.prune(query, query.object_id, &table.splits(), &mut buffer)?;

        let mut joins = Vec::with_capacity(query.joins.len());
        for (index, (clause, strategy)) in query
            .joins
            .iter()
            .zip(Coordinator::join_strategies(query))
            .enumerate()
        {
            let foreign = self.catalog.require(&clause.foreign_path)?;
            joins.push(JoinPlan {
                table: clause.foreign_path.clone(),
                strategy,
                ranges: coordinator.prune_foreign(query, index, &foreign.splits(), &mut buffer)?,
            });
        }

        let count = ranges.len().to_string();
        log_event_with_fields(
            Event::QueryPruned,
            &[("ranges", count.as_str()), ("table", query.table_path.as_str())],
        );
        Ok(PrunePlan {
            table: query.table_path.clone(),
            ranges,
            joins,
        })
    }

    pub async fn prune(&self, request: &QueryRequest) -> QueryResult<PrunePlan> {
        let query = self.prepare(request).await?;
        self.plan(&query)
    }

    /// Plan description. A rejected query yields a rejected explain rather
    /// than an error.
    pub async fn explain(&self, request: &QueryRequest) -> QueryResult<QueryExplain> {
        let query = match self.prepare(request).await {
            Ok(query) => query,
            Err(QueryError::Prepare(err)) => return Ok(QueryExplain::from_error(&err)),
            Err(err) => return Err(err),
        };
        let plan = self.plan(&query)?;
        let explain = QueryExplain::from_query(&query)
            .with_ranges(plan.ranges)
            .with_join_strategies(plan.joins.iter().map(|join| join.strategy.to_string()))
            .with_fingerprint(fingerprint(&query));
        log_event_with_fields(Event::ExplainComplete, &[("table", query.table_path.as_str())]);
        Ok(explain)
    }

    pub async fn execute(&self, request: &QueryRequest) -> QueryResult<QueryOutput> {
        let registry = self.registry_for(&request.udfs)?;
        let query = self.prepare_with(request, &registry).await?;
        self.execute_query(&query, registry).await
    }

    /// Runs a prepared query
    pub async fn execute_query(&self, query: &Query, registry: Arc<FunctionRegistry>) -> QueryResult<QueryOutput> {
        let scope = ObservationScope::with_fields("EXECUTE", &[("table", query.table_path.as_str())]);
        match self.run(query, registry).await {
            Ok(output) => {
                self.metrics.record_evaluation(&output.statistics);
                let read = output.statistics.rows_read.to_string();
                let written = output.statistics.rows_written.to_string();
                log_event_with_fields(
                    Event::QueryEvaluated,
                    &[("rows_read", read.as_str()), ("rows_written", written.as_str())],
                );
                scope.complete_with_fields(&[("rows", written.as_str())]);
                Ok(output)
            }
            Err(err) => {
                self.metrics.increment_queries_failed();
                let message = err.to_string();
                log_event_with_fields(Event::QueryFailed, &[("code", err.code()), ("reason", message.as_str())]);
                scope.fail(&message);
                Err(err)
            }
        }
    }

    async fn run(&self, query: &Query, registry: Arc<FunctionRegistry>) -> QueryResult<QueryOutput> {
        let plan = self.plan(query)?;
        let table = self.catalog.require(&query.table_path)?.clone();

        let mut joins = Vec::with_capacity(plan.joins.len());
        for (clause, join) in query.joins.iter().zip(&plan.joins) {
            let foreign = self.catalog.require(&clause.foreign_path)?.clone();
            let lookup = CatalogLookup::new(foreign, clause, join.ranges.clone(), &registry)?;
            joins.push(JoinInput {
                strategy: join.strategy,
                evaluator: Arc::new(lookup),
            });
        }

        // Fragments may interleave only when ORDER BY reorders the output anyway
        let ordered = query.ordered_scan
            || query.order.is_none()
            || plan.joins.iter().any(|join| join.strategy == JoinStrategy::SortMerge)
            || query.group.as_ref().map_or(false, |group| group.use_disjoint_group_by);
        let settings = FragmentSettings {
            worker_pool_size: self.config.worker_pool_size,
            channel_capacity: self.config.channel_capacity,
            rows_per_read: self.config.query.rows_per_read,
            ordered,
        };
        self.metrics.add_ranges_scanned(plan.ranges.len() as u64);
        let (mut reader, _scan) = FragmentScan::start(table, plan.ranges, settings);

        let evaluator = Evaluator::new(registry, self.compiled.clone(), self.config.query.clone());
        let mut writer = MemoryWriter::new();
        let statistics = evaluator.run(query, &mut reader, &mut writer, &joins).await?;
        Ok(QueryOutput {
            columns: query.output_names(),
            rows: writer.into_rows(),
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const CATALOG: &str = r#"{
        "tables": {
            "//t": {
                "schema": {"columns": [
                    {"name": "k", "type": "int64", "sort_order": "ascending"},
                    {"name": "v", "type": "int64"}
                ]},
                "rows": [{"k": 1, "v": 10}, {"k": 2, "v": 20}, {"k": 3, "v": 30}, {"k": 4, "v": 40}],
                "splits": [[3]]
            },
            "//f": {
                "schema": {"columns": [
                    {"name": "k", "type": "int64", "sort_order": "ascending"},
                    {"name": "name", "type": "string"}
                ]},
                "rows": [{"k": 1, "name": "one"}, {"k": 3, "name": "three"}]
            }
        }
    }"#;

    fn engine() -> Engine {
        let catalog = Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap();
        Engine::new(EngineConfig::default(), catalog)
    }

    #[tokio::test]
    async fn test_execute_filters_and_projects() {
        let engine = engine();
        let output = engine
            .execute(&QueryRequest::new("k, v * 2 as w from [//t] where k >= 2 and v < 40"))
            .await
            .unwrap();
        assert_eq!(output.columns, vec!["k", "w"]);
        assert_eq!(output.rows.len(), 2);
        assert_eq!(output.rows[1][1], Value::Int64(60));
        assert_eq!(output.json_rows()[0]["w"], 40);
    }

    #[tokio::test]
    async fn test_prune_uses_splits() {
        let engine = engine();
        let plan = engine.prune(&QueryRequest::new("k from [//t] where k = 3")).await.unwrap();
        assert_eq!(plan.table, "//t");
        assert_eq!(plan.ranges.len(), 1);
        assert!(plan.ranges[0].contains(&crate::schema::Key::from_values(vec![Value::Int64(3)])));
    }

    #[tokio::test]
    async fn test_execute_join() {
        let engine = engine();
        let output = engine
            .execute(&QueryRequest::new("k, name from [//t] join [//f] using k"))
            .await
            .unwrap();
        let names: Vec<_> = output.rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(names, vec![Value::String("one".into()), Value::String("three".into())]);
        assert_eq!(output.statistics.join_subqueries, 1);
    }

    #[tokio::test]
    async fn test_explain_rejected_query() {
        let engine = engine();
        let explain = engine.explain(&QueryRequest::new("k from [//missing]")).await.unwrap();
        assert!(!explain.accepted);
        assert_eq!(explain.rejection_code.as_deref(), Some("QL_TABLE_NOT_FOUND"));
        assert_eq!(engine.metrics().queries_rejected, 1);
    }

    #[tokio::test]
    async fn test_explain_accepted_query() {
        let engine = engine();
        let explain = engine
            .explain(&QueryRequest::new("k, name from [//t] join [//f] using k"))
            .await
            .unwrap();
        assert!(explain.accepted);
        assert_eq!(explain.joins[0].strategy.as_deref(), Some("SortMerge"));
        assert!(explain.fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_metrics_count_cache_hits() {
        let engine = engine();
        let request = QueryRequest::new("k from [//t] where v > 15");
        engine.execute(&request).await.unwrap();
        engine.execute(&request).await.unwrap();
        let metrics = engine.metrics();
        assert_eq!(metrics.queries_evaluated, 2);
        assert_eq!(metrics.compiled_cache_hits, 1);
        assert_eq!(metrics.rows_written, 6);
    }
}
