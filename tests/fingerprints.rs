//! Fingerprint Tests
//!
//! Queries that differ only in conjunct order or in the order of
//! independent LEFT JOINs share a fingerprint and a compiled program.
//! Queries that compute different things never do.

use shardql::coordinator::JoinStrategy;
use shardql::engine::{Catalog, Engine, QueryRequest};
use shardql::evaluator::fingerprint;
use shardql::functions::FunctionRegistry;
use shardql::value::Value;
use shardql::EngineConfig;

// =============================================================================
// Helper Functions
// =============================================================================

const CATALOG: &str = r#"{
    "tables": {
        "//p": {
            "schema": {"columns": [
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "a", "type": "int64"},
                {"name": "b", "type": "int64"},
                {"name": "v", "type": "string"}
            ]},
            "rows": [
                {"k": 1, "a": 1, "b": 1, "v": "one"},
                {"k": 2, "a": 2, "b": 1, "v": "two"},
                {"k": 3, "a": 3, "b": 2, "v": "three"}
            ]
        },
        "//names": {
            "schema": {"columns": [
                {"name": "name", "type": "string", "sort_order": "ascending"},
                {"name": "id", "type": "int64"}
            ]},
            "rows": [{"name": "one", "id": 1}, {"name": "three", "id": 3}]
        },
        "//codes": {
            "schema": {"columns": [
                {"name": "code", "type": "string", "sort_order": "ascending"},
                {"name": "id", "type": "int64"}
            ]},
            "rows": [{"code": "x", "id": 2}, {"code": "y", "id": 3}]
        },
        "//keyed": {
            "schema": {"columns": [
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "label", "type": "string"}
            ]},
            "rows": [{"k": 1, "label": "l1"}, {"k": 3, "label": "l3"}]
        },
        "//ids": {
            "schema": {"columns": [
                {"name": "id", "type": "int64", "sort_order": "ascending"},
                {"name": "tag", "type": "string"}
            ]},
            "rows": [{"id": 2, "tag": "t2"}, {"id": 3, "tag": "t3"}]
        }
    }
}"#;

const KEYED_FIRST: &str = "p.k as k, x.label as label, y.tag as tag from [//p] p \
    left join [//keyed] x on p.k = x.k \
    left join [//ids] y on p.a = y.id";

const KEYED_LAST: &str = "p.k as k, x.label as label, y.tag as tag from [//p] p \
    left join [//ids] y on p.a = y.id \
    left join [//keyed] x on p.k = x.k";

fn engine() -> Engine {
    let catalog = Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap();
    Engine::new(EngineConfig::default(), catalog)
}

async fn fingerprint_of(engine: &Engine, source: &str) -> String {
    let query = engine.prepare(&QueryRequest::new(source)).await.unwrap();
    fingerprint(&query)
}

// =============================================================================
// Equal Fingerprints
// =============================================================================

#[tokio::test]
async fn test_permuted_conjuncts_share_fingerprint() {
    let engine = engine();
    let first = fingerprint_of(&engine, "k from [//p] where a > 1 and b < 5 and v != \"x\"").await;
    let second = fingerprint_of(&engine, "k from [//p] where v != \"x\" and b < 5 and a > 1").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_independent_left_joins_share_fingerprint() {
    let engine = engine();
    let first = fingerprint_of(
        &engine,
        "p.k as k, n.name as name, c.code as code from [//p] p \
         left join [//names] n on p.a = n.id \
         left join [//codes] c on p.a = c.id",
    )
    .await;
    let second = fingerprint_of(
        &engine,
        "p.k as k, n.name as name, c.code as code from [//p] p \
         left join [//codes] c on p.a = c.id \
         left join [//names] n on p.a = n.id",
    )
    .await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reordered_joins_return_same_rows() {
    let engine = engine();
    let first = engine
        .execute(&QueryRequest::new(
            "p.k as k, n.name as name, c.code as code from [//p] p \
             left join [//names] n on p.a = n.id \
             left join [//codes] c on p.a = c.id",
        ))
        .await
        .unwrap();
    let second = engine
        .execute(&QueryRequest::new(
            "p.k as k, n.name as name, c.code as code from [//p] p \
             left join [//codes] c on p.a = c.id \
             left join [//names] n on p.a = n.id",
        ))
        .await
        .unwrap();

    assert_eq!(first.columns, second.columns);
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.rows.len(), 3);
    assert_eq!(engine.metrics().compiled_cache_hits, 1);
}

#[tokio::test]
async fn test_join_order_with_key_prefix_shares_fingerprint() {
    let engine = engine();
    let first = engine.prepare(&QueryRequest::new(KEYED_FIRST)).await.unwrap();
    let second = engine.prepare(&QueryRequest::new(KEYED_LAST)).await.unwrap();

    // The key-aligned join only keeps its common prefix when it runs first
    assert_eq!(first.joins[0].foreign_path, "//keyed");
    assert_eq!(first.joins[0].common_key_prefix, 1);
    assert_eq!(second.joins[1].foreign_path, "//keyed");
    assert_eq!(second.joins[1].common_key_prefix, 0);
    assert_eq!(engine.plan(&first).unwrap().joins[0].strategy, JoinStrategy::SortMerge);
    assert_eq!(engine.plan(&second).unwrap().joins[1].strategy, JoinStrategy::ForeignLookup);

    assert_eq!(fingerprint(&first), fingerprint(&second));
}

#[tokio::test]
async fn test_join_order_with_key_prefix_returns_same_rows() {
    let engine = engine();
    let mut first = engine.execute(&QueryRequest::new(KEYED_FIRST)).await.unwrap().rows;
    let mut second = engine.execute(&QueryRequest::new(KEYED_LAST)).await.unwrap().rows;
    first.sort();
    second.sort();

    assert_eq!(first, second);
    assert_eq!(
        first[0].values(),
        &[Value::Int64(1), Value::from("l1"), Value::Null]
    );
    assert_eq!(
        first[1].values(),
        &[Value::Int64(2), Value::Null, Value::from("t2")]
    );
    assert_eq!(
        first[2].values(),
        &[Value::Int64(3), Value::from("l3"), Value::from("t3")]
    );

    let metrics = engine.metrics();
    assert_eq!(metrics.compiled_cache_misses, 1);
    assert_eq!(metrics.compiled_cache_hits, 1);
}

#[tokio::test]
async fn test_permuted_conjuncts_hit_compiled_cache() {
    let engine = engine();
    engine
        .execute(&QueryRequest::new("k from [//p] where a > 1 and b < 5"))
        .await
        .unwrap();
    engine
        .execute(&QueryRequest::new("k from [//p] where b < 5 and a > 1"))
        .await
        .unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.compiled_cache_misses, 1);
    assert_eq!(metrics.compiled_cache_hits, 1);
}

// =============================================================================
// Different Fingerprints
// =============================================================================

#[tokio::test]
async fn test_different_group_keys_differ() {
    let engine = engine();
    let by_a = fingerprint_of(&engine, "sum(k) as s from [//p] group by a").await;
    let by_b = fingerprint_of(&engine, "sum(k) as s from [//p] group by b").await;
    assert_ne!(by_a, by_b);
}

#[tokio::test]
async fn test_literals_and_limits_differ() {
    let engine = engine();
    let one = fingerprint_of(&engine, "k from [//p] where a > 1").await;
    let two = fingerprint_of(&engine, "k from [//p] where a > 2").await;
    let limited = fingerprint_of(&engine, "k from [//p] where a > 1 limit 1").await;
    assert_ne!(one, two);
    assert_ne!(one, limited);
}

#[tokio::test]
async fn test_dependent_joins_keep_order() {
    let engine = engine();
    let first = fingerprint_of(
        &engine,
        "p.k as k from [//p] p \
         left join [//names] n on p.v = n.name \
         left join [//codes] c on n.id = c.id",
    )
    .await;
    let explain = engine
        .explain(&QueryRequest::new(
            "p.k as k from [//p] p \
             left join [//names] n on p.v = n.name \
             left join [//codes] c on n.id = c.id",
        ))
        .await
        .unwrap();
    assert!(explain.accepted);
    assert_eq!(explain.joins.len(), 2);
    assert_eq!(explain.fingerprint.as_deref(), Some(first.as_str()));
}
