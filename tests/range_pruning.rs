//! Range Pruning Tests
//!
//! Key ranges computed from WHERE predicates and split bounds:
//! - Point and IN predicates produce one range per key
//! - Ranges never cross a split boundary
//! - Contradictions read nothing
//! - Computed key columns are evaluated from their references
//! - Pruned reads return the same rows as full scans

use shardql::config::{EngineConfig, QueryOptions};
use shardql::engine::{Catalog, Engine, QueryRequest};
use shardql::functions::FunctionRegistry;
use shardql::schema::{Key, KeyRange};
use shardql::value::Value;

// =============================================================================
// Helper Functions
// =============================================================================

const CATALOG: &str = r#"{
    "tables": {
        "//plain": {
            "schema": {"columns": [
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "v", "type": "int64"}
            ]},
            "rows": [
                {"k": 1, "v": 1}, {"k": 5, "v": 2}, {"k": 12, "v": 3},
                {"k": 15, "v": 4}, {"k": 21, "v": 5}, {"k": 25, "v": 6}
            ],
            "splits": [[10], [20]]
        },
        "//hashed": {
            "schema": {"columns": [
                {"name": "h", "type": "int64", "sort_order": "ascending", "expression": "k % 4"},
                {"name": "k", "type": "int64", "sort_order": "ascending"},
                {"name": "v", "type": "string"}
            ]},
            "rows": [
                {"k": 1, "v": "a"}, {"k": 2, "v": "b"}, {"k": 5, "v": "c"},
                {"k": 6, "v": "d"}, {"k": 9, "v": "e"}
            ],
            "splits": [[2]]
        }
    }
}"#;

fn engine_with(config: EngineConfig) -> Engine {
    let catalog = Catalog::from_json(CATALOG, &FunctionRegistry::builtin(), 50).unwrap();
    Engine::new(config, catalog)
}

fn engine() -> Engine {
    engine_with(EngineConfig::default())
}

fn key(values: &[i64]) -> Key {
    Key::from_values(values.iter().map(|v| Value::Int64(*v)))
}

async fn ranges(engine: &Engine, source: &str) -> Vec<KeyRange> {
    engine.prune(&QueryRequest::new(source)).await.unwrap().ranges
}

// =============================================================================
// Plain Keys
// =============================================================================

#[tokio::test]
async fn test_point_predicate_reads_one_key() {
    let engine = engine();
    let ranges = ranges(&engine, "v from [//plain] where k = 5").await;
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].contains(&key(&[5])));
    assert!(!ranges[0].contains(&key(&[6])));
}

#[tokio::test]
async fn test_in_list_splits_per_value() {
    let engine = engine();
    let ranges = ranges(&engine, "v from [//plain] where k in (1, 15, 25)").await;
    assert_eq!(ranges.len(), 3);
    for (range, value) in ranges.iter().zip([1, 15, 25]) {
        assert!(range.contains(&key(&[value])));
    }
}

#[tokio::test]
async fn test_interval_clipped_to_splits() {
    let engine = engine();
    let ranges = ranges(&engine, "v from [//plain] where k >= 5 and k < 22").await;

    // one piece per overlapped split, sorted and disjoint
    assert_eq!(ranges.len(), 3);
    for pair in ranges.windows(2) {
        assert!(pair[0].upper <= pair[1].lower);
    }
    assert!(ranges[0].contains(&key(&[5])));
    assert!(!ranges.iter().any(|r| r.contains(&key(&[4]))));
    assert!(!ranges.iter().any(|r| r.contains(&key(&[22]))));
}

#[tokio::test]
async fn test_contradiction_reads_nothing() {
    let engine = engine();
    assert!(ranges(&engine, "v from [//plain] where k = 1 and k = 2").await.is_empty());

    let output = engine
        .execute(&QueryRequest::new("v from [//plain] where k = 1 and k = 2"))
        .await
        .unwrap();
    assert!(output.rows.is_empty());
    assert_eq!(output.statistics.rows_read, 0);
}

#[tokio::test]
async fn test_non_key_predicate_keeps_splits() {
    let engine = engine();
    let ranges = ranges(&engine, "k from [//plain] where v > 3").await;
    assert_eq!(ranges.len(), 3);
    assert_eq!(ranges[0].lower, Key::min());
    assert_eq!(ranges[2].upper, Key::max());
}

#[tokio::test]
async fn test_expansion_limit_falls_back_to_split() {
    let config = EngineConfig {
        query: QueryOptions {
            range_expansion_limit: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = engine_with(config);
    let ranges = ranges(&engine, "v from [//plain] where k in (1, 5, 12, 15)").await;

    // every key is still covered
    for value in [1, 5, 12, 15] {
        assert!(ranges.iter().any(|r| r.contains(&key(&[value]))));
    }
    assert_eq!(engine.metrics().queries_prepared, 1);
}

// =============================================================================
// Computed Keys
// =============================================================================

#[tokio::test]
async fn test_computed_key_is_evaluated() {
    let engine = engine();
    let ranges = ranges(&engine, "v from [//hashed] where k = 5").await;
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].contains(&key(&[1, 5])));
    assert!(!ranges[0].contains(&key(&[1, 9])));
}

#[tokio::test]
async fn test_computed_key_with_in_list() {
    let engine = engine();
    let output = engine
        .execute(&QueryRequest::new("k, v from [//hashed] where k in (2, 9)"))
        .await
        .unwrap();
    let keys: Vec<_> = output.rows.iter().filter_map(|r| r[0].as_i64()).collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&2));
    assert!(keys.contains(&9));
    assert_eq!(output.statistics.rows_read, 2);
}

// =============================================================================
// Pruning Preserves Results
// =============================================================================

#[tokio::test]
async fn test_pruned_scan_matches_filter() {
    let engine = engine();
    let all = [1, 5, 12, 15, 21, 25];
    let cases: [(&str, fn(i64) -> bool); 4] = [
        ("k in (5, 21)", |k| k == 5 || k == 21),
        ("k between 3 and 16", |k| (3..=16).contains(&k)),
        ("k > 12 or k = 1", |k| k > 12 || k == 1),
        ("k < 0", |k| k < 0),
    ];
    for (predicate, admits) in cases {
        let output = engine
            .execute(&QueryRequest::new(format!("k from [//plain] where {}", predicate)))
            .await
            .unwrap();
        let keys: Vec<i64> = output.rows.iter().filter_map(|r| r[0].as_i64()).collect();
        let expected: Vec<i64> = all.iter().copied().filter(|k| admits(*k)).collect();
        assert_eq!(keys, expected, "{}", predicate);
        assert!(output.statistics.rows_read <= all.len() as u64);
    }
}
