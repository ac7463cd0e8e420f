//! Table and value formatting shared by commands.

use anyhow::{Context, Result, bail};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use extmount_core::StorageStatus;
use serde::Serialize;
use serde_json::Value;

/// Table with the common style
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Colored status cell
pub fn status_cell(status: Option<StorageStatus>) -> Cell {
    match status {
        Some(StorageStatus::Success) => Cell::new("ok").fg(Color::Green),
        Some(StorageStatus::Error) => Cell::new("error").fg(Color::Red),
        Some(StorageStatus::Indeterminate) => Cell::new("indeterminate").fg(Color::Yellow),
        None => Cell::new("-"),
    }
}

/// Human-readable byte count
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Unix time as local date and time
pub fn format_time(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Pretty-print a value as JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `key=value`; `true`/`false` and integers become JSON scalars
pub fn parse_key_value(input: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = input.split_once('=') else {
        bail!("expected key=value, got '{input}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty option name in '{input}'");
    }
    let value = match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map_or_else(|_| Value::String(raw.to_string()), Value::from),
    };
    Ok((key.to_string(), value))
}

/// clap value parser for `key=value` arguments
pub fn key_value_arg(input: &str) -> Result<(String, Value), String> {
    parse_key_value(input)
        .context("invalid option")
        .map_err(|e| format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("host=example.com").unwrap(), ("host".into(), Value::from("example.com")));
        assert_eq!(parse_key_value("secure=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse_key_value("port=2121").unwrap().1, Value::from(2121));
        assert_eq!(parse_key_value("root=/a=b").unwrap().1, Value::from("/a=b"));
        assert_eq!(parse_key_value("password=").unwrap().1, Value::from(""));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
