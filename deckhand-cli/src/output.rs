//! JSON output helpers
//!
//! Results go to stdout as JSON; the short colored status line goes to stderr.

use anyhow::Result;
use colored::*;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};

/// Prints a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a value with a `success` field set, returning `success`
///
/// Values that do not serialize to an object are wrapped under `result`.
pub fn print_with_status<T: Serialize>(success: bool, value: &T) -> Result<bool> {
    let body = match serde_json::to_value(value)? {
        JsonValue::Object(mut map) => {
            map.insert("success".to_string(), JsonValue::Bool(success));
            JsonValue::Object(map)
        }
        other => json!({ "success": success, "result": other }),
    };
    print_json(&body)?;
    Ok(success)
}

/// Prints a one-line status to stderr
pub fn report_status(success: bool, label: &str) {
    if success {
        eprintln!("{} {}", "✓".green().bold(), label);
    } else {
        eprintln!("{} {}", "✗".red().bold(), label);
    }
}

/// Prints a failure envelope for an error that aborted the command
pub fn print_error(err: &anyhow::Error) {
    let body = json!({ "success": false, "error": format!("{:#}", err) });
    if let Ok(text) = serde_json::to_string_pretty(&body) {
        println!("{}", text);
    }
    eprintln!("{} {:#}", "error:".red().bold(), err);
}
