//! CLI argument definitions using clap
//!
//! Commands:
//! - shardql query --catalog <path> [<query>]
//! - shardql explain --catalog <path> [--text] [<query>]
//! - shardql prune --catalog <path> [<query>]
//!
//! The query text is read from stdin when not given as an argument.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// shardql - query preparation, range pruning and evaluation over key-sorted tables
#[derive(Parser, Debug)]
#[command(name = "shardql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Engine configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Minimum severity of log lines written to stderr
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Catalog file with table schemas and rows
    #[arg(long)]
    pub catalog: PathBuf,

    /// Placeholder values as a JSON object
    #[arg(long)]
    pub placeholders: Option<String>,

    /// JSON file with an array of UDF declarations for this query
    #[arg(long)]
    pub udfs: Option<PathBuf>,

    /// Query text
    pub query: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a query and print its rows
    Query {
        #[command(flatten)]
        args: QueryArgs,
    },

    /// Prepare a query and print its plan
    Explain {
        #[command(flatten)]
        args: QueryArgs,

        /// Human-readable output instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Print the key ranges a query would read
    Prune {
        #[command(flatten)]
        args: QueryArgs,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
