//! CLI Command Tests
//!
//! Commands run against catalog and config files on disk:
//! - query returns columns, rows and statistics
//! - explain prints JSON or text plans, including rejections
//! - prune reports ranges per table
//! - failures keep the query error code

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tempfile::TempDir;

use shardql::cli::{load_config, run_command, Command, CommandOutput, QueryArgs};
use shardql::EngineConfig;

// =============================================================================
// Helper Functions
// =============================================================================

const CATALOG: &str = r#"{
    "tables": {
        "//t": {
            "schema": {"columns": [
                {"name": "a", "type": "int64", "sort_order": "ascending"},
                {"name": "b", "type": "int64"}
            ]},
            "rows": [{"a": 4, "b": 5}, {"a": 10, "b": 11}, {"a": 20, "b": 21}],
            "splits": [[10]]
        }
    }
}"#;

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.json");
    fs::write(&path, CATALOG).unwrap();
    (tmp, path)
}

fn args(catalog: &PathBuf, query: &str) -> QueryArgs {
    QueryArgs {
        catalog: catalog.clone(),
        placeholders: None,
        udfs: None,
        query: Some(query.to_string()),
    }
}

fn json(output: CommandOutput) -> Value {
    match output {
        CommandOutput::Json(value) => value,
        CommandOutput::Text(text) => panic!("expected JSON output, got {}", text),
    }
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn test_query_command() {
    let (_tmp, catalog) = setup();
    let command = Command::Query {
        args: args(&catalog, "a, b from [//t] where a < 15"),
    };
    let data = json(run_command(&EngineConfig::default(), command).await.unwrap());

    assert_eq!(data["columns"], serde_json::json!(["a", "b"]));
    assert_eq!(data["rows"], serde_json::json!([{"a": 4, "b": 5}, {"a": 10, "b": 11}]));
    assert_eq!(data["statistics"]["rows_written"], 2);
}

#[tokio::test]
async fn test_query_with_placeholders() {
    let (_tmp, catalog) = setup();
    let mut query_args = args(&catalog, "b from [//t] where (a, b) = {pair}");
    query_args.placeholders = Some(r#"{"pair": [10, 11]}"#.to_string());

    let data = json(
        run_command(&EngineConfig::default(), Command::Query { args: query_args })
            .await
            .unwrap(),
    );
    assert_eq!(data["rows"], serde_json::json!([{"b": 11}]));
}

#[tokio::test]
async fn test_explain_command() {
    let (_tmp, catalog) = setup();
    let command = Command::Explain {
        args: args(&catalog, "a from [//t] where a = 4"),
        text: false,
    };
    let data = json(run_command(&EngineConfig::default(), command).await.unwrap());
    assert_eq!(data["accepted"], true);
    assert_eq!(data["table"], "//t");
    assert_eq!(data["ranges"].as_array().unwrap().len(), 1);

    let command = Command::Explain {
        args: args(&catalog, "a from [//t] order by b"),
        text: true,
    };
    match run_command(&EngineConfig::default(), command).await.unwrap() {
        CommandOutput::Text(text) => {
            assert!(text.contains("Status: REJECTED"));
            assert!(text.contains("ORDER BY used without LIMIT"));
        }
        other => panic!("expected text output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_prune_command() {
    let (_tmp, catalog) = setup();
    let command = Command::Prune {
        args: args(&catalog, "b from [//t] where a in (4, 20)"),
    };
    let data = json(run_command(&EngineConfig::default(), command).await.unwrap());
    assert_eq!(data["table"], "//t");
    assert_eq!(data["ranges"].as_array().unwrap().len(), 2);
    assert_eq!(data["joins"], serde_json::json!([]));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_query_error_code_is_kept() {
    let (_tmp, catalog) = setup();
    let command = Command::Query {
        args: args(&catalog, "missing from [//t]"),
    };
    let err = run_command(&EngineConfig::default(), command).await.unwrap_err();
    assert_eq!(err.code_str(), "QL_UNRESOLVED_REFERENCE");
}

#[tokio::test]
async fn test_missing_catalog() {
    let tmp = TempDir::new().unwrap();
    let command = Command::Query {
        args: args(&tmp.path().join("absent.json"), "a from [//t]"),
    };
    let err = run_command(&EngineConfig::default(), command).await.unwrap_err();
    assert_eq!(err.code_str(), "QL_CATALOG_ERROR");
}

#[tokio::test]
async fn test_invalid_placeholders() {
    let (_tmp, catalog) = setup();
    let mut query_args = args(&catalog, "a from [//t]");
    query_args.placeholders = Some("[1, 2]".to_string());
    let err = run_command(&EngineConfig::default(), Command::Query { args: query_args })
        .await
        .unwrap_err();
    assert_eq!(err.code_str(), "QL_PLACEHOLDER_ERROR");
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_load_config_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("engine.json");
    fs::write(&path, r#"{"worker_pool_size": 2, "query": {"range_expansion_limit": 10}}"#).unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.worker_pool_size, 2);
    assert_eq!(config.query.range_expansion_limit, 10);
    assert_eq!(config.query.max_expression_depth, 50);

    assert!(load_config(None).is_ok());
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("engine.json");
    fs::write(&path, r#"{"worker_pool_size": 0}"#).unwrap();

    let err = load_config(Some(&path)).unwrap_err();
    assert_eq!(err.code_str(), "QL_CLI_CONFIG_ERROR");
}
