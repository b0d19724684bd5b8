//! shardql CLI entry point
//!
//! Parses arguments and hands over to `cli::run`; prints the error to
//! stderr and exits non-zero on failure.

use shardql::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
