//! Query Property Tests
//!
//! End-to-end properties of prepared and evaluated queries:
//! - Scans return rows in scan order
//! - OFFSET/LIMIT partition the input
//! - ORDER BY is independent of input order
//! - ORDER BY and OFFSET require LIMIT
//! - WITH TOTALS emits one extra row in either HAVING position
//! - Literal coercion, NaN comparison and placeholder tuples

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::thread_rng;
use serde_json::json;

use shardql::config::EngineConfig;
use shardql::engine::{Catalog, Engine, QueryRequest};
use shardql::functions::FunctionRegistry;
use shardql::parser::Placeholders;
use shardql::rows::Row;
use shardql::schema::{ColumnSchema, TableSchema};
use shardql::value::{Value, ValueType};

// =============================================================================
// Helper Functions
// =============================================================================

fn unkeyed_schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnSchema::new("a", ValueType::Int64),
        ColumnSchema::new("b", ValueType::Int64),
    ])
    .unwrap()
}

fn engine_with(rows: Vec<(i64, i64)>) -> Engine {
    let mut catalog = Catalog::new(Arc::new(FunctionRegistry::builtin()), 50);
    let rows = rows
        .into_iter()
        .map(|(a, b)| Row::new(vec![Value::Int64(a), Value::Int64(b)]))
        .collect();
    catalog.add_table("//t", unkeyed_schema(), rows, Vec::new()).unwrap();
    Engine::new(EngineConfig::default(), catalog)
}

async fn column_a(engine: &Engine, source: &str) -> Vec<i64> {
    let output = engine.execute(&QueryRequest::new(source)).await.unwrap();
    output.rows.iter().filter_map(|row| row[0].as_i64()).collect()
}

// =============================================================================
// Scan Order and Limits
// =============================================================================

#[tokio::test]
async fn test_scan_returns_rows_in_order() {
    let engine = engine_with(vec![(4, 5), (10, 11)]);
    let output = engine.execute(&QueryRequest::new("a, b from [//t]")).await.unwrap();

    assert_eq!(output.columns, vec!["a", "b"]);
    assert_eq!(output.rows.len(), 2);
    assert_eq!(output.rows[0].values(), &[Value::Int64(4), Value::Int64(5)]);
    assert_eq!(output.rows[1].values(), &[Value::Int64(10), Value::Int64(11)]);
    assert!(!output.statistics.incomplete_output);
}

#[tokio::test]
async fn test_offset_and_limit_partition_input() {
    let engine = engine_with((0..9).map(|a| (a, 0)).collect());

    let prefix = column_a(&engine, "a from [//t] limit 5").await;
    let next = column_a(&engine, "a from [//t] offset 5 limit 1").await;

    assert_eq!(prefix, vec![0, 1, 2, 3, 4]);
    assert_eq!(next, vec![5]);
}

#[tokio::test]
async fn test_order_by_ignores_input_permutation() {
    let mut rows: Vec<(i64, i64)> = (0..50).map(|a| (a, a * 7 % 11)).collect();
    let expected: Vec<i64> = (0..50).collect();

    for _ in 0..5 {
        rows.shuffle(&mut thread_rng());
        let engine = engine_with(rows.clone());
        let sorted = column_a(&engine, "* from [//t] order by a limit 100").await;
        assert_eq!(sorted, expected);
    }
}

#[tokio::test]
async fn test_order_and_offset_require_limit() {
    let engine = engine_with(vec![(1, 1)]);

    let err = engine
        .execute(&QueryRequest::new("* from [//t] order by a"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QL_LIMIT_REQUIRED");
    assert!(err.to_string().contains("ORDER BY used without LIMIT"));

    let err = engine
        .execute(&QueryRequest::new("* from [//t] offset 5"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("OFFSET used without LIMIT"));
    assert_eq!(engine.metrics().queries_rejected, 2);
}

// =============================================================================
// Grouping
// =============================================================================

#[tokio::test]
async fn test_totals_in_both_having_positions() {
    let engine = engine_with(vec![(1, 0), (2, 1), (3, 0), (4, 1), (5, 0)]);

    for source in [
        "b, sum(a) as s from [//t] group by b with totals having s > 0",
        "b, sum(a) as s from [//t] group by b having s > 0 with totals",
    ] {
        let output = engine.execute(&QueryRequest::new(source)).await.unwrap();
        assert_eq!(output.rows.len(), 3, "{}", source);
        assert_eq!(output.rows[0].values(), &[Value::Int64(0), Value::Int64(9)]);
        assert_eq!(output.rows[1].values(), &[Value::Int64(1), Value::Int64(6)]);
        assert_eq!(output.rows[2][0], Value::Null);
        assert_eq!(output.rows[2][1], Value::Int64(15));
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[tokio::test]
async fn test_in_list_coerces_literals() {
    let engine = engine_with(vec![(4, 0), (-10, 1), (5, 2), (10, 3)]);
    let matched = column_a(&engine, "a from [//t] where a in (4.0, -10)").await;
    assert_eq!(matched, vec![4, -10]);
}

#[tokio::test]
async fn test_nan_in_order_by_fails() {
    let engine = engine_with(vec![(0, 0), (1, 0), (2, 0)]);
    let err = engine
        .execute(&QueryRequest::new("a from [//t] order by 0.0 / double(a) limit 10"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QL_COMPARISON_ERROR");
    assert_eq!(engine.metrics().queries_failed, 1);
}

#[tokio::test]
async fn test_tuple_placeholder() {
    let engine = engine_with(vec![(1, 2), (3, 4), (3, 5), (4, 4)]);
    let placeholders = Placeholders::from_json(Some(&json!({"tuple": [3, 4]}))).unwrap();
    let request = QueryRequest::new("a, b from [//t] where (a, b) = {tuple}").with_placeholders(placeholders);

    let output = engine.execute(&request).await.unwrap();
    assert_eq!(output.rows.len(), 1);
    assert_eq!(output.rows[0].values(), &[Value::Int64(3), Value::Int64(4)]);
}

#[tokio::test]
async fn test_missing_placeholder_is_rejected() {
    let engine = engine_with(vec![(1, 2)]);
    let err = engine
        .execute(&QueryRequest::new("a from [//t] where a = {missing}"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QL_PLACEHOLDER_ERROR");
}

#[test]
fn test_placeholder_maps_are_rejected() {
    let err = Placeholders::from_json(Some(&json!({"a": {"b": 1}}))).unwrap_err();
    assert!(err.message().contains("values should be plain types or lists"));

    let err = Placeholders::from_json(Some(&json!({"a": [{"$attributes": {}}]}))).unwrap_err();
    assert_eq!(err.message(), "Attributes inside placeholder are not allowed");
}
