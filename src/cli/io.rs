//! stdin/stdout handling
//!
//! - Input: query text, from the argument or all of stdin
//! - Output: one JSON object per command on stdout, UTF-8

use std::io::{self, Read, Write};

use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Query text from the argument, or all of stdin when absent
pub fn read_query(argument: Option<&str>) -> CliResult<String> {
    let text = match argument {
        Some(text) => text.to_string(),
        None => {
            let mut text = String::new();
            io::stdin().lock().read_to_string(&mut text)?;
            text
        }
    };
    if text.trim().is_empty() {
        return Err(CliError::io_error("Empty query"));
    }
    Ok(text)
}

pub fn write_response(data: Value) -> CliResult<()> {
    write_value(&serde_json::json!({
        "status": "ok",
        "data": data
    }))
}

pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_value(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

/// Writes plain text followed by a newline
pub fn write_text(text: &str) -> CliResult<()> {
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", text.trim_end())?;
    stdout.flush()?;
    Ok(())
}

fn write_value(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_query_argument() {
        assert_eq!(read_query(Some("a from [//t]")).unwrap(), "a from [//t]");
        assert!(read_query(Some("   ")).is_err());
    }
}
