//! Join Tests
//!
//! Join strategies must be interchangeable:
//! - Sort-merge and foreign-lookup joins produce the same row multiset
//! - Key prefixes reported on join clauses follow the equations
//! - LEFT JOIN pads unmatched rows with nulls
//! - Foreign reads are pruned through join equations

use shardql::coordinator::JoinStrategy;
use shardql::engine::{Catalog, Engine, QueryRequest};
use shardql::functions::FunctionRegistry;
use shardql::rows::Row;
use shardql::schema::{Key, KeyRange};
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
                {"name": "n", "type": "int64", "sort_order": "ascending"},
                {"name": "v", "type": "string"}
            ]},
            "rows": [
                {"k": 1, "n": 1, "v": "a"}, {"k": 1, "n": 2, "v": "b"}, {"k": 2, "n": 1, "v": "c"},
                {"k": 3, "n": 1, "v": "d"}, {"k": 4, "n": 1, "v": "e"}, {"k": 5, "n": 7, "v": "f"}
            ],
            "splits": [[3]]
        },
        "//by_key": {
            "schema": {"columns": [
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "name", "type": "string"}
            ]},
            "rows": [{"k": 1, "name": "one"}, {"k": 3, "name": "three"}, {"k": 5, "name": "five"}],
            "splits": [[4]]
        },
        "//by_name": {
            "schema": {"columns": [
                {"name": "name", "type": "string", "sort_order": "ascending"},
                {"name": "k", "type": "int64"}
            ]},
            "rows": [{"k": 1, "name": "one"}, {"k": 3, "name": "three"}, {"k": 5, "name": "five"}]
        }
    }
}"#;

fn engine() -> Engine {
    let catalog = Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap();
    Engine::new(EngineConfig::default(), catalog)
}

async fn sorted_rows(engine: &Engine, source: &str) -> Vec<Row> {
    let mut rows = engine.execute(&QueryRequest::new(source)).await.unwrap().rows;
    rows.sort();
    rows
}

fn key(values: &[i64]) -> Key {
    Key::from_values(values.iter().map(|v| Value::Int64(*v)))
}

// =============================================================================
// Strategy Equivalence
// =============================================================================

#[tokio::test]
async fn test_strategies_are_chosen_from_prefixes() {
    let engine = engine();

    let merged = engine
        .prepare(&QueryRequest::new("p.v, f.name from [//p] p join [//by_key] f on p.k = f.k"))
        .await
        .unwrap();
    assert_eq!(merged.joins[0].foreign_key_prefix, 1);
    assert_eq!(merged.joins[0].common_key_prefix, 1);

    let looked_up = engine
        .prepare(&QueryRequest::new("p.v, f.name from [//p] p join [//by_name] f on p.k = f.k"))
        .await
        .unwrap();
    assert_eq!(looked_up.joins[0].foreign_key_prefix, 0);
    assert_eq!(looked_up.joins[0].common_key_prefix, 0);

    let plan = engine.plan(&merged).unwrap();
    assert_eq!(plan.joins[0].strategy, JoinStrategy::SortMerge);
    let plan = engine.plan(&looked_up).unwrap();
    assert_eq!(plan.joins[0].strategy, JoinStrategy::ForeignLookup);
}

#[tokio::test]
async fn test_inner_join_strategies_agree() {
    let engine = engine();
    let merged = sorted_rows(&engine, "p.k, p.n, f.name from [//p] p join [//by_key] f on p.k = f.k").await;
    let looked_up = sorted_rows(&engine, "p.k, p.n, f.name from [//p] p join [//by_name] f on p.k = f.k").await;

    assert_eq!(merged.len(), 4);
    assert_eq!(merged, looked_up);
    assert_eq!(
        merged[0].values(),
        &[Value::Int64(1), Value::Int64(1), Value::from("one")]
    );
}

#[tokio::test]
async fn test_left_join_strategies_agree() {
    let engine = engine();
    let merged = sorted_rows(&engine, "p.k, f.name from [//p] p left join [//by_key] f on p.k = f.k").await;
    let looked_up = sorted_rows(&engine, "p.k, f.name from [//p] p left join [//by_name] f on p.k = f.k").await;

    assert_eq!(merged.len(), 6);
    assert_eq!(merged, looked_up);

    let unmatched: Vec<_> = merged.iter().filter(|row| row[1] == Value::Null).collect();
    assert_eq!(unmatched.len(), 2);
}

#[tokio::test]
async fn test_residual_predicate_applies_to_both_strategies() {
    let engine = engine();
    let merged = sorted_rows(
        &engine,
        "p.k, p.n from [//p] p join [//by_key] f on p.k = f.k and p.n < f.k",
    )
    .await;
    let looked_up = sorted_rows(
        &engine,
        "p.k, p.n from [//p] p join [//by_name] f on p.k = f.k and p.n < f.k",
    )
    .await;

    assert_eq!(merged, looked_up);
    let keys: Vec<_> = merged.iter().map(|row| (row[0].clone(), row[1].clone())).collect();
    assert_eq!(keys, vec![(Value::Int64(3), Value::Int64(1))]);
}

// =============================================================================
// Foreign Pruning
// =============================================================================

#[tokio::test]
async fn test_foreign_ranges_follow_equations() {
    let engine = engine();
    let plan = engine
        .prune(&QueryRequest::new(
            "p.v, f.name from [//p] p join [//by_key] f on p.k = f.k where p.k in (1, 5)",
        ))
        .await
        .unwrap();

    assert_eq!(plan.ranges.len(), 2);
    let foreign = &plan.joins[0];
    assert_eq!(foreign.table, "//by_key");
    assert_eq!(foreign.ranges.len(), 2);
    assert!(foreign.ranges[0].contains(&key(&[1])));
    assert!(foreign.ranges[1].contains(&key(&[5])));
    assert!(!foreign.ranges.iter().any(|r| r.contains(&key(&[3]))));
}

#[tokio::test]
async fn test_foreign_ranges_without_predicate() {
    let engine = engine();
    let plan = engine
        .prune(&QueryRequest::new("p.v from [//p] p left join [//by_name] f on p.k = f.k"))
        .await
        .unwrap();
    assert_eq!(plan.joins[0].ranges, vec![KeyRange::universal()]);
}

#[tokio::test]
async fn test_join_statistics() {
    let engine = engine();
    let output = engine
        .execute(&QueryRequest::new(
            "p.v, f.name from [//p] p join [//by_name] f on p.k = f.k",
        ))
        .await
        .unwrap();
    assert!(output.statistics.join_subqueries >= 1);
    assert_eq!(output.statistics.rows_read, 6);
    assert_eq!(engine.metrics().join_subqueries, output.statistics.join_subqueries);
}
