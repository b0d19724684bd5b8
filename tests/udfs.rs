//! User-Defined Function Tests
//!
//! WebAssembly functions supplied with a request:
//! - scalar and aggregate UDFs evaluate inside full queries
//! - a UDF is visible only to the request that declares it
//! - replacing a UDF's code under the same name recompiles the query

use shardql::engine::{Catalog, Engine, QueryRequest};
use shardql::functions::{FunctionRegistry, UdfDescriptor};
use shardql::rows::Row;
use shardql::value::{Value, ValueType};
use shardql::EngineConfig;

// =============================================================================
// Helper Functions
// =============================================================================

const CATALOG: &str = r#"{
    "tables": {
        "//t": {
            "schema": {"columns": [
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "v", "type": "int64"}
            ]},
            "rows": [{"k": 1, "v": 10}, {"k": 2, "v": 20}, {"k": 3, "v": 30}, {"k": 4, "v": 40}],
            "splits": [[3]]
        }
    }
}"#;

fn engine() -> Engine {
    let catalog = Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap();
    Engine::new(EngineConfig::default(), catalog)
}

/// Scalar `bump(x) = x + step`
fn bump(step: i64) -> UdfDescriptor {
    UdfDescriptor {
        name: "bump".into(),
        symbol: None,
        arguments: vec![ValueType::Int64],
        result: ValueType::Int64,
        state: None,
        module: format!(
            r#"(module (func (export "bump") (param i64) (result i64)
                local.get 0 i64.const {} i64.add))"#,
            step
        ),
    }
}

fn sum_squares() -> UdfDescriptor {
    UdfDescriptor {
        name: "sum_squares".into(),
        symbol: Some("ss".into()),
        arguments: vec![ValueType::Int64],
        result: ValueType::Int64,
        state: Some(ValueType::Int64),
        module: r#"(module
            (func (export "ss_init") (result i64) i64.const 0)
            (func (export "ss_update") (param i64 i64) (result i64)
                local.get 0 local.get 1 local.get 1 i64.mul i64.add)
            (func (export "ss_merge") (param i64 i64) (result i64)
                local.get 0 local.get 1 i64.add)
            (func (export "ss_finalize") (param i64) (result i64) local.get 0))"#
            .into(),
    }
}

fn ints(rows: &[Row], column: usize) -> Vec<i64> {
    rows.iter().filter_map(|r| r[column].as_i64()).collect()
}

// =============================================================================
// Evaluation
// =============================================================================

#[tokio::test]
async fn test_scalar_udf_in_projection_and_filter() {
    let engine = engine();
    let request =
        QueryRequest::new("k, bump(v) as w from [//t] where bump(k) > 2").with_udfs(vec![bump(1)]);
    let output = engine.execute(&request).await.unwrap();

    assert_eq!(output.columns, vec!["k".to_string(), "w".to_string()]);
    assert_eq!(ints(&output.rows, 0), vec![2, 3, 4]);
    assert_eq!(ints(&output.rows, 1), vec![21, 31, 41]);
}

#[tokio::test]
async fn test_aggregate_udf_in_group_by() {
    let engine = engine();
    let request = QueryRequest::new("p, sum_squares(k) as s from [//t] group by k % 2 as p")
        .with_udfs(vec![sum_squares()]);
    let mut rows = engine.execute(&request).await.unwrap().rows;
    rows.sort();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values(), &[Value::Int64(0), Value::Int64(20)]);
    assert_eq!(rows[1].values(), &[Value::Int64(1), Value::Int64(10)]);
}

#[tokio::test]
async fn test_udf_scoped_to_request() {
    let engine = engine();
    engine
        .execute(&QueryRequest::new("bump(v) as w from [//t]").with_udfs(vec![bump(1)]))
        .await
        .unwrap();

    let err = engine
        .execute(&QueryRequest::new("bump(v) as w from [//t]"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "QL_UNRESOLVED_REFERENCE");
}

// =============================================================================
// Compiled Cache
// =============================================================================

#[tokio::test]
async fn test_replaced_udf_recompiles() {
    let engine = engine();
    let source = "bump(v) as w from [//t] where k = 1";

    let first = engine
        .execute(&QueryRequest::new(source).with_udfs(vec![bump(1)]))
        .await
        .unwrap();
    let replaced = engine
        .execute(&QueryRequest::new(source).with_udfs(vec![bump(100)]))
        .await
        .unwrap();
    assert_eq!(ints(&first.rows, 0), vec![11]);
    assert_eq!(ints(&replaced.rows, 0), vec![110]);

    let metrics = engine.metrics();
    assert_eq!(metrics.compiled_cache_misses, 2);
    assert_eq!(metrics.compiled_cache_hits, 0);

    let again = engine
        .execute(&QueryRequest::new(source).with_udfs(vec![bump(1)]))
        .await
        .unwrap();
    assert_eq!(ints(&again.rows, 0), vec![11]);
    assert_eq!(engine.metrics().compiled_cache_hits, 1);
}
