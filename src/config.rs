//! Engine configuration
//!
//! Loaded from JSON; every field has a default so partial files are valid.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-query limits and tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Rows read from all sources before the query fails (default: 1000000)
    #[serde(default = "default_input_row_limit")]
    pub input_row_limit: u64,

    /// Rows emitted before the query fails (default: 1000000)
    #[serde(default = "default_output_row_limit")]
    pub output_row_limit: u64,

    /// Bytes of row storage one execution may hold (default: 256 MiB)
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    /// Key ranges one split may be expanded into by range pruning (default: 1000)
    #[serde(default = "default_range_expansion_limit")]
    pub range_expansion_limit: usize,

    /// Maximum expression nesting (default: 50)
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,

    /// Upper bound of the adaptive read size (default: 1024)
    #[serde(default = "default_rows_per_read")]
    pub rows_per_read: usize,

    /// Primary rows per foreign lookup (default: 512)
    #[serde(default = "default_join_batch_size")]
    pub join_batch_size: usize,
}

fn default_input_row_limit() -> u64 {
    1_000_000
}

fn default_output_row_limit() -> u64 {
    1_000_000
}

fn default_memory_limit() -> usize {
    256 * 1024 * 1024
}

fn default_range_expansion_limit() -> usize {
    1000
}

fn default_max_expression_depth() -> usize {
    50
}

fn default_rows_per_read() -> usize {
    1024
}

fn default_join_batch_size() -> usize {
    512
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            input_row_limit: default_input_row_limit(),
            output_row_limit: default_output_row_limit(),
            memory_limit: default_memory_limit(),
            range_expansion_limit: default_range_expansion_limit(),
            max_expression_depth: default_max_expression_depth(),
            rows_per_read: default_rows_per_read(),
            join_batch_size: default_join_batch_size(),
        }
    }
}

impl QueryOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_expression_depth == 0 {
            return Err(ConfigError::Invalid("max_expression_depth must be positive".into()));
        }
        if self.rows_per_read == 0 || self.join_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "rows_per_read and join_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Process-wide engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub query: QueryOptions,

    /// Compiled queries kept in memory (default: 128)
    #[serde(default = "default_compiled_cache_capacity")]
    pub compiled_cache_capacity: usize,

    /// Schemas with memoized computed-column evaluators (default: 64)
    #[serde(default = "default_column_evaluator_cache_capacity")]
    pub column_evaluator_cache_capacity: usize,

    /// Fragments running at once (default: 4)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Batches buffered per fragment channel (default: 4)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_compiled_cache_capacity() -> usize {
    128
}

fn default_column_evaluator_cache_capacity() -> usize {
    64
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query: QueryOptions::default(),
            compiled_cache_capacity: default_compiled_cache_capacity(),
            column_evaluator_cache_capacity: default_column_evaluator_cache_capacity(),
            worker_pool_size: default_worker_pool_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 || self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size and channel_capacity must be positive".into(),
            ));
        }
        self.query.validate()
    }
}
