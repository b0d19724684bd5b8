//! Command-line interface
//!
//! - query: execute a query over a catalog file
//! - explain: print the prepared plan, with pruned ranges and join strategies
//! - prune: print the key ranges a query reads

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, QueryArgs};
pub use commands::{explain, load_config, prune, query, run, run_cli, run_command, CommandOutput};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_query, write_error, write_response};
