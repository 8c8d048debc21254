//! Raw CSV decoding.
//!
//! Raw exports carry a header row. Each cell is typed with the column type
//! declared in the catalog when it parses as that type, and otherwise kept as
//! text, so a column holding both `42` and `n/a` surfaces as an ambiguous
//! (`choice`) column downstream instead of failing the object.

use crate::record::Record;
use crate::value::{DataType, Field, Value};
use anyhow::{Context, Result};

/// Decode a CSV payload with a header row into records.
///
/// * Columns missing from `declared` are read as strings.
/// * Empty cells in non-string columns are null; empty strings are kept.
/// * Short rows leave their trailing columns absent.
///
/// # Errors
/// Returns an error if a row cannot be read (bad quoting, invalid UTF-8).
pub fn read_csv_records(data: &[u8], delimiter: u8, declared: &[Field]) -> Result<Vec<Record>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let headers: Vec<(String, DataType)> = rdr
        .headers()
        .context("read CSV header")?
        .iter()
        .map(|h| {
            let name = h.trim().to_string();
            let data_type = declared
                .iter()
                .find(|f| f.name == name)
                .map_or(DataType::String, |f| f.data_type.clone());
            (name, data_type)
        })
        .collect();

    let mut out = Vec::new();
    for (i, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("parse CSV record #{}", i + 1))?;
        let mut record = Record::new();
        for ((name, data_type), cell) in headers.iter().zip(row.iter()) {
            record.set(name.clone(), type_cell(cell, data_type));
        }
        out.push(record);
    }
    Ok(out)
}

fn type_cell(cell: &str, declared: &DataType) -> Value {
    if *declared == DataType::String {
        return Value::String(cell.to_string());
    }
    if cell.trim().is_empty() {
        return Value::Null;
    }
    let raw = Value::String(cell.to_string());
    raw.cast(declared).unwrap_or(raw)
}
