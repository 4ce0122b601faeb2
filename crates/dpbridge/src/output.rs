use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dpbridge_codec::DpValue;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Human-readable value for tables and pretty output.
pub fn value_text(value: &DpValue) -> String {
    match value {
        DpValue::Raw(bytes) => format!("0x{}", hex::encode(bytes)),
        DpValue::Bool(b) => b.to_string(),
        DpValue::Value(v) => v.to_string(),
        DpValue::String(s) => format!("{s:?}"),
        DpValue::Enum(e) => format!("enum {e}"),
        DpValue::Bitmap(bits) => format!("0b{bits:b}"),
    }
}

/// Parse hex, ignoring whitespace, `:` separators and an optional `0x` prefix.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_accepts_separators() {
        assert_eq!(parse_hex("01:01 00 01\t01").unwrap(), vec![1, 1, 0, 1, 1]);
        assert_eq!(parse_hex("0xEF00").unwrap(), vec![0xEF, 0x00]);
        assert!(parse_hex("0g").is_err());
    }

    #[test]
    fn value_text_is_readable() {
        assert_eq!(value_text(&DpValue::Bitmap(5)), "0b101");
        assert_eq!(value_text(&DpValue::Raw(bytes::Bytes::from_static(&[0xAB]))), "0xab");
    }
}
