//! Table catalog and the source reader.
//!
//! A catalog maps `(database, table)` onto a [`TableDefinition`]: where the
//! table's objects live, how they are encoded, the declared column types and
//! the Hive-style partition keys encoded in object keys
//! (`…/region=ca/file.csv`).
//!
//! [`read_table`] is the first stage of the job. It evaluates the push-down
//! predicate against partition values taken from object keys, so objects of
//! other partitions are never fetched, then decodes the surviving objects in
//! parallel, one dataset partition per object.

use crate::dataset::Dataset;
use crate::error::{EtlError, Result};
use crate::io::compression::{auto_decompress, strip_codec_extension};
use crate::predicate::Predicate;
use crate::record::Record;
use crate::storage::{CloudIOError, CloudResult, ErrorKind, ObjectIO, ObjectLocation};
use crate::value::{DataType, Field, Value};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{LazyLock, RwLock};
use tracing::{debug, info};

/// Partition value written for null partition keys.
pub const DEFAULT_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

static PARTITION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^=/]+)=([^/]*)$").expect("valid partition segment regex"));

/// Encoding of a table's objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    #[serde(alias = "jsonl", alias = "json_lines")]
    Json,
    Parquet,
}

/// Resolved catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub database: String,
    pub name: String,
    /// Location URI, e.g. `s3://raw-bucket/youtube/raw_statistics/`.
    pub location: String,
    pub format: SourceFormat,
    /// Field delimiter for CSV tables.
    pub delimiter: u8,
    /// Declared data columns (partition keys excluded).
    pub columns: Vec<Field>,
    pub partition_keys: Vec<String>,
}

/// Lookup of table definitions.
pub trait Catalog: Send + Sync {
    /// Fetch the definition of `database.table`.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the table is not registered.
    fn get_table(&self, database: &str, table: &str) -> CloudResult<TableDefinition>;
}

// ============================================================================
// In-memory / file catalog
// ============================================================================

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    databases: BTreeMap<String, DatabaseEntry>,
}

#[derive(Debug, Deserialize)]
struct DatabaseEntry {
    #[serde(default)]
    tables: Vec<TableEntry>,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    name: String,
    location: String,
    format: SourceFormat,
    #[serde(default)]
    delimiter: Option<char>,
    #[serde(default)]
    columns: Vec<ColumnEntry>,
    #[serde(default)]
    partition_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ColumnEntry {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

/// Catalog held in memory, optionally loaded from a JSON document:
///
/// ```json
/// { "databases": { "de-youtube-raw": { "tables": [ {
///     "name": "raw_statistics",
///     "location": "s3://raw-bucket/youtube/raw_statistics/",
///     "format": "csv",
///     "columns": [ { "name": "views", "type": "bigint" } ],
///     "partition_keys": ["region"]
/// } ] } } }
/// ```
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<HashMap<(String, String), TableDefinition>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table definition.
    pub fn register(&self, table: TableDefinition) {
        self.tables
            .write()
            .expect("catalog lock poisoned")
            .insert((table.database.clone(), table.name.clone()), table);
    }

    /// Parse a catalog document.
    ///
    /// # Errors
    /// Returns [`EtlError::Catalog`] on malformed JSON, unknown column types or
    /// a non-ASCII delimiter.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(text)
            .map_err(|e| EtlError::Catalog(format!("malformed catalog document: {e}")))?;
        let catalog = Self::new();
        for (database, entry) in doc.databases {
            for table in entry.tables {
                catalog.register(table_definition(&database, table)?);
            }
        }
        Ok(catalog)
    }

    /// Load a catalog document from disk.
    ///
    /// # Errors
    /// Returns [`EtlError::Catalog`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Catalog(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

fn table_definition(database: &str, entry: TableEntry) -> Result<TableDefinition> {
    let mut columns = Vec::with_capacity(entry.columns.len());
    for col in entry.columns {
        let data_type = DataType::parse_name(&col.data_type).ok_or_else(|| {
            EtlError::Catalog(format!(
                "{database}.{}: unknown type `{}` for column {}",
                entry.name, col.data_type, col.name
            ))
        })?;
        columns.push(Field::new(col.name, data_type));
    }
    let delimiter = match entry.delimiter {
        None => b',',
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => {
            return Err(EtlError::Catalog(format!(
                "{database}.{}: delimiter {c:?} is not ASCII",
                entry.name
            )));
        }
    };
    Ok(TableDefinition {
        database: database.to_string(),
        name: entry.name,
        location: entry.location,
        format: entry.format,
        delimiter,
        columns,
        partition_keys: entry.partition_keys,
    })
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, database: &str, table: &str) -> CloudResult<TableDefinition> {
        self.tables
            .read()
            .expect("catalog lock poisoned")
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| {
                CloudIOError::new(
                    ErrorKind::NotFound,
                    format!("Table {database}.{table} not found"),
                )
            })
    }
}

// ============================================================================
// Source reader
// ============================================================================

/// What to read.
#[derive(Debug, Clone)]
pub struct SourceRequest<'a> {
    pub database: &'a str,
    pub table: &'a str,
    pub push_down_predicate: &'a str,
    pub transformation_ctx: &'a str,
}

/// An object selected for reading, with its partition values.
#[derive(Debug, Clone)]
struct SelectedObject {
    key: String,
    partition_values: BTreeMap<String, String>,
}

/// Percent-encode the characters that cannot appear in a partition segment.
#[must_use]
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() || "\"#%'*/:=?\\{}[]^".contains(c) {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of [`escape_partition_value`]. Malformed escapes are kept as is.
#[must_use]
pub fn unescape_partition_value(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `k=v` segments of `relative_key` for the given partition keys.
///
/// Keys whose value is [`DEFAULT_PARTITION_VALUE`] are left out, so they
/// read as null.
#[must_use]
pub fn partition_values(relative_key: &str, partition_keys: &[String]) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut segments: Vec<&str> = relative_key.split('/').collect();
    segments.pop(); // file name
    for segment in segments {
        if let Some(caps) = PARTITION_SEGMENT.captures(segment) {
            let key = &caps[1];
            if partition_keys.iter().any(|k| k == key) && &caps[2] != DEFAULT_PARTITION_VALUE {
                values.insert(key.to_string(), unescape_partition_value(&caps[2]));
            }
        }
    }
    values
}

/// Read the rows of `database.table` that satisfy the push-down predicate.
///
/// # Errors
///
/// - [`EtlError::InvalidPredicate`] if the predicate does not parse or names a
///   column that is not a partition key. A blank predicate reads everything.
/// - [`EtlError::TableNotFound`] if the catalog has no such table.
/// - [`EtlError::Storage`] / [`EtlError::Decode`] on listing, fetch or decode failures.
pub fn read_table(
    catalog: &dyn Catalog,
    storage: &dyn ObjectIO,
    request: &SourceRequest<'_>,
) -> Result<Dataset> {
    let predicate = if request.push_down_predicate.trim().is_empty() {
        Predicate::always()
    } else {
        Predicate::parse(request.push_down_predicate).map_err(|e| EtlError::InvalidPredicate {
            predicate: request.push_down_predicate.to_string(),
            reason: e.to_string(),
        })?
    };

    let table = catalog
        .get_table(request.database, request.table)
        .map_err(|e| match e.kind {
            ErrorKind::NotFound => EtlError::TableNotFound {
                database: request.database.to_string(),
                table: request.table.to_string(),
            },
            _ => EtlError::Catalog(e.to_string()),
        })?;

    if let Some(column) = predicate
        .columns()
        .into_iter()
        .find(|c| !table.partition_keys.contains(c))
    {
        return Err(EtlError::InvalidPredicate {
            predicate: predicate.text().to_string(),
            reason: format!(
                "column `{column}` is not a partition key of {}.{}",
                table.database, table.name
            ),
        });
    }

    let location = ObjectLocation::parse(&table.location)
        .map_err(|e| EtlError::Catalog(format!("{}.{}: {e}", table.database, table.name)))?;

    let listed = storage.list_objects(&location.bucket, Some(&location.prefix))?;
    let total = listed.len();
    let selected: Vec<SelectedObject> = listed
        .into_iter()
        .filter_map(|obj| {
            let relative = obj.key.strip_prefix(&location.prefix)?.to_string();
            let hidden = relative
                .split('/')
                .any(|seg| seg.is_empty() || seg.starts_with('_') || seg.starts_with('.'));
            if hidden {
                return None;
            }
            let values = partition_values(&relative, &table.partition_keys);
            predicate.matches_partition(&values).then_some(SelectedObject {
                key: obj.key,
                partition_values: values,
            })
        })
        .collect();

    info!(
        ctx = request.transformation_ctx,
        table = %format!("{}.{}", table.database, table.name),
        predicate = predicate.text(),
        listed = total,
        selected = selected.len(),
        "pruned source objects with push-down predicate"
    );

    let partitions = selected
        .par_iter()
        .map(|obj| read_object(storage, &location.bucket, &table, obj))
        .collect::<Result<Vec<Vec<Record>>>>()?;

    let dataset = Dataset::from_partitions(partitions);
    info!(
        ctx = request.transformation_ctx,
        rows = dataset.num_rows(),
        partitions = dataset.num_partitions(),
        "source read complete"
    );
    Ok(dataset)
}

fn read_object(
    storage: &dyn ObjectIO,
    bucket: &str,
    table: &TableDefinition,
    obj: &SelectedObject,
) -> Result<Vec<Record>> {
    let raw = storage.get_object(bucket, &obj.key)?;
    let data = auto_decompress(&obj.key, &raw).map_err(|e| EtlError::decode(&obj.key, e))?;
    let mut records = decode(table, strip_codec_extension(&obj.key), &data)?;
    debug!(key = %obj.key, rows = records.len(), "decoded source object");

    for (key, raw_value) in &obj.partition_values {
        let value = partition_value(table, key, raw_value);
        for record in &mut records {
            record.set(key.clone(), value.clone());
        }
    }
    Ok(records)
}

fn partition_value(table: &TableDefinition, key: &str, raw: &str) -> Value {
    let text = Value::String(raw.to_string());
    match table.columns.iter().find(|f| f.name == key) {
        Some(field) => text.cast(&field.data_type).unwrap_or(text),
        None => text,
    }
}

fn decode(table: &TableDefinition, key: &str, data: &[u8]) -> Result<Vec<Record>> {
    match table.format {
        #[cfg(feature = "io-csv")]
        SourceFormat::Csv => {
            crate::io::csv::read_csv_records(data, table.delimiter, &table.columns)
                .map_err(|e| EtlError::decode(key, format!("{e:#}")))
        }
        #[cfg(feature = "io-jsonl")]
        SourceFormat::Json => crate::io::jsonl::read_jsonl_records(data)
            .map_err(|e| EtlError::decode(key, format!("{e:#}"))),
        SourceFormat::Parquet => crate::io::parquet::decode_parquet(data.to_vec())
            .map_err(|e| EtlError::decode(key, format!("{e:#}"))),
        #[allow(unreachable_patterns)]
        other => Err(EtlError::decode(
            key,
            format!("{other:?} support is not compiled in"),
        )),
    }
}

/// Fail if any record does not satisfy `predicate`.
///
/// Partition pruning happens in the storage layer; this re-checks the rows
/// that actually arrived so a catalog or store that ignores the predicate
/// cannot leak other partitions into the output.
///
/// # Errors
/// Returns [`EtlError::PushdownViolation`] naming the first offending record.
pub fn verify_pushdown(dataset: &Dataset, predicate: &Predicate) -> Result<()> {
    let columns = predicate.columns();
    match dataset.records().find(|r| !predicate.matches(r)) {
        None => Ok(()),
        Some(record) => {
            let detail = columns
                .iter()
                .map(|c| format!("{c}={}", record.get(c).to_text()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(EtlError::PushdownViolation {
                predicate: predicate.text().to_string(),
                detail,
            })
        }
    }
}
