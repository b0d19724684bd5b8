//! CLI command implementations
//!
//! Every command loads the catalog, builds an engine and runs one request.
//! Results go to stdout as `{"status": "ok", "data": ...}`; failures as
//! `{"status": "error", "code": ..., "message": ...}` with a non-zero exit.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::engine::{Catalog, Engine, QueryRequest};
use crate::error::QueryError;
use crate::functions::{FunctionRegistry, UdfDescriptor};
use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::parser::Placeholders;

use super::args::{Cli, Command, QueryArgs};
use super::errors::{CliError, CliResult};
use super::io::{read_query, write_error, write_response, write_text};

/// What a command prints on success
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Text(String),
}

/// Main CLI entry point
pub fn run() -> CliResult<()> {
    run_cli(Cli::parse_args())
}

pub fn run_cli(cli: Cli) -> CliResult<()> {
    let severity = Severity::parse(&cli.log_level)
        .ok_or_else(|| CliError::config_error(format!("Unknown log level '{}'", cli.log_level)))?;
    Logger::set_min_severity(severity);

    let config = load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_pool_size)
        .enable_all()
        .build()
        .map_err(|e| CliError::io_error(format!("Cannot start runtime: {}", e)))?;

    match runtime.block_on(run_command(&config, cli.command)) {
        Ok(CommandOutput::Json(data)) => write_response(data),
        Ok(CommandOutput::Text(text)) => write_text(&text),
        Err(err) => {
            write_error(err.code_str(), err.message())?;
            Err(err)
        }
    }
}

pub fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path).map_err(|e| CliError::config_error(e.to_string()))?,
        None => EngineConfig::default(),
    };
    let source = path.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".to_string());
    log_event_with_fields(Event::ConfigLoaded, &[("source", source.as_str())]);
    Ok(config)
}

pub async fn run_command(config: &EngineConfig, command: Command) -> CliResult<CommandOutput> {
    match command {
        Command::Query { args } => query(config, &args).await,
        Command::Explain { args, text } => explain(config, &args, text).await,
        Command::Prune { args } => prune(config, &args).await,
    }
}

pub async fn query(config: &EngineConfig, args: &QueryArgs) -> CliResult<CommandOutput> {
    let (engine, request) = open(config, args)?;
    let output = engine.execute(&request).await?;
    Ok(CommandOutput::Json(json!({
        "columns": output.columns,
        "rows": output.json_rows(),
        "statistics": serde_json::to_value(&output.statistics)?,
    })))
}

pub async fn explain(config: &EngineConfig, args: &QueryArgs, text: bool) -> CliResult<CommandOutput> {
    let (engine, request) = open(config, args)?;
    let explain = engine.explain(&request).await?;
    if text {
        Ok(CommandOutput::Text(explain.to_string()))
    } else {
        Ok(CommandOutput::Json(serde_json::to_value(&explain)?))
    }
}

pub async fn prune(config: &EngineConfig, args: &QueryArgs) -> CliResult<CommandOutput> {
    let (engine, request) = open(config, args)?;
    let plan = engine.prune(&request).await?;
    Ok(CommandOutput::Json(serde_json::to_value(&plan)?))
}

fn open(config: &EngineConfig, args: &QueryArgs) -> CliResult<(Engine, QueryRequest)> {
    let source = read_query(args.query.as_deref())?;
    let placeholders = match &args.placeholders {
        Some(text) => {
            let json: Value = serde_json::from_str(text)
                .map_err(|e| CliError::config_error(format!("Invalid placeholders: {}", e)))?;
            Placeholders::from_json(Some(&json)).map_err(|e| CliError::from(QueryError::from(e)))?
        }
        None => Placeholders::empty(),
    };
    let udfs = match &args.udfs {
        Some(path) => load_udfs(path)?,
        None => Vec::new(),
    };

    let catalog = Catalog::load(
        &args.catalog,
        &FunctionRegistry::builtin(),
        config.query.max_expression_depth,
    )?;
    let tables = catalog.paths().len().to_string();
    log_event_with_fields(Event::CatalogLoaded, &[("tables", tables.as_str())]);

    let request = QueryRequest::new(source)
        .with_placeholders(placeholders)
        .with_udfs(udfs);
    Ok((Engine::new(config.clone(), catalog), request))
}

fn load_udfs(path: &Path) -> CliResult<Vec<UdfDescriptor>> {
    let text = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Cannot read UDF file {}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| CliError::config_error(format!("Invalid UDF file: {}", e)))
}
