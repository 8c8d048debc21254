//! JSON Lines decoding.

use crate::record::Record;
use anyhow::{Context, Result, bail};

/// Decode newline-delimited JSON objects. Blank lines are skipped.
///
/// Values keep their JSON types, so a field that is a number in one line and
/// a string in another becomes an ambiguous column.
///
/// # Errors
/// Returns an error on malformed JSON or a line that is not an object.
pub fn read_jsonl_records(data: &[u8]) -> Result<Vec<Record>> {
    let text = std::str::from_utf8(data).context("JSON Lines payload is not UTF-8")?;
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).with_context(|| format!("parse JSON line #{}", i + 1))?;
        let Some(record) = Record::from_json(value) else {
            bail!("JSON line #{} is not an object", i + 1);
        };
        out.push(record);
    }
    Ok(out)
}
