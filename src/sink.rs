//! Partitioned Parquet writer.
//!
//! Output layout under the target location:
//!
//! ```text
//! <prefix>/region=ca/part-00000-datasink4.snappy.parquet
//! <prefix>/region=us/part-00000-datasink4.snappy.parquet
//! ```
//!
//! Partition columns live only in the path. Every file is first written under
//! `<prefix>/_temporary/`. Existing `part-` objects of the touched partitions
//! are deleted only after all files are staged, then the staged files are
//! moved into place.

use crate::catalog::{DEFAULT_PARTITION_VALUE, escape_partition_value};
use crate::dataset::Dataset;
use crate::error::{EtlError, Result};
use crate::io::parquet::encode_parquet;
use crate::record::Record;
use crate::storage::{ObjectIO, ObjectLocation};
use crate::value::Field;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
#[cfg(feature = "parallel-io")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Parquet page compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Uncompressed,
}

impl ParquetCompression {
    fn codec(self) -> Compression {
        match self {
            Self::Snappy => Compression::SNAPPY,
            Self::Gzip => Compression::GZIP(GzipLevel::default()),
            Self::Zstd => Compression::ZSTD(ZstdLevel::default()),
            Self::Uncompressed => Compression::UNCOMPRESSED,
        }
    }

    /// File name suffix before `.parquet`.
    fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Snappy => Some("snappy"),
            Self::Gzip => Some("gz"),
            Self::Zstd => Some("zstd"),
            Self::Uncompressed => None,
        }
    }
}

/// Handling of objects already present in a partition being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Replace the `part-` files of every partition this write touches.
    #[default]
    Dynamic,
    /// Leave existing files alone.
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkOptions {
    /// Target location URI.
    pub path: String,
    pub partition_keys: Vec<String>,
    pub transformation_ctx: String,
    pub compression: ParquetCompression,
    pub overwrite: OverwriteMode,
    /// Number of output units the dataset is coalesced into.
    pub output_units: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            path: "s3://de-cleansed-project-us-east-1-dev/youtube/raw_statistics/".to_string(),
            partition_keys: vec!["region".to_string()],
            transformation_ctx: "datasink4".to_string(),
            compression: ParquetCompression::Snappy,
            overwrite: OverwriteMode::Dynamic,
            output_units: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenFile {
    pub key: String,
    /// Path segments such as `region=ca`.
    pub partition: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SinkReport {
    pub bucket: String,
    pub files: Vec<WrittenFile>,
    pub rows_written: usize,
    /// Objects removed by dynamic partition overwrite.
    pub replaced_objects: usize,
}

struct PendingFile<'a> {
    unit: usize,
    partition: String,
    records: Vec<&'a Record>,
}

/// `key=value/…` directory of `record` for the given keys.
fn partition_dir(record: &Record, keys: &[String]) -> String {
    keys.iter()
        .map(|k| {
            let value = record.get(k);
            let text = if value.is_null() {
                DEFAULT_PARTITION_VALUE.to_string()
            } else {
                escape_partition_value(&value.to_text())
            };
            format!("{k}={text}")
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn file_name(unit: usize, options: &SinkOptions) -> String {
    match options.compression.suffix() {
        Some(suffix) => format!("part-{unit:05}-{}.{suffix}.parquet", options.transformation_ctx),
        None => format!("part-{unit:05}-{}.parquet", options.transformation_ctx),
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Coalesce `dataset` and write it as partitioned Parquet.
///
/// Produces exactly one file per (output unit, partition value) pair. An
/// empty dataset writes nothing.
///
/// # Errors
/// Returns [`EtlError::Sink`] if the location is invalid, encoding fails or
/// storage rejects a write.
pub fn write_partitioned(
    dataset: Dataset,
    storage: &dyn ObjectIO,
    options: &SinkOptions,
) -> Result<SinkReport> {
    let location = ObjectLocation::parse(&options.path).map_err(EtlError::sink)?;
    let dataset = dataset.coalesce(options.output_units);

    let file_fields: Vec<Field> = dataset
        .schema()
        .fields()
        .iter()
        .filter(|f| !options.partition_keys.contains(&f.name))
        .cloned()
        .collect();

    let mut pending: Vec<PendingFile<'_>> = Vec::new();
    for (unit, records) in dataset.partitions().iter().enumerate() {
        let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for record in records {
            groups
                .entry(partition_dir(record, &options.partition_keys))
                .or_default()
                .push(record);
        }
        pending.extend(groups.into_iter().map(|(partition, records)| PendingFile {
            unit,
            partition,
            records,
        }));
    }

    let mut report = SinkReport {
        bucket: location.bucket.clone(),
        ..SinkReport::default()
    };

    let encode = |file: &PendingFile<'_>| -> Result<(String, Vec<u8>)> {
        let bytes = encode_parquet(&file_fields, &file.records, options.compression.codec())
            .map_err(|e| EtlError::sink(format!("encode {}: {e:#}", file.partition)))?;
        Ok((join(&file.partition, &file_name(file.unit, options)), bytes))
    };
    #[cfg(feature = "parallel-io")]
    let encoded: Vec<(String, Vec<u8>)> = pending.par_iter().map(encode).collect::<Result<_>>()?;
    #[cfg(not(feature = "parallel-io"))]
    let encoded: Vec<(String, Vec<u8>)> = pending.iter().map(encode).collect::<Result<_>>()?;

    // Committed output is only touched once every new file is staged.
    let mut staged: Vec<String> = Vec::with_capacity(encoded.len());
    for (relative, bytes) in &encoded {
        let staging = location.key(&format!(
            "_temporary/{}/{relative}",
            options.transformation_ctx
        ));
        if let Err(e) = storage.put_object(&location.bucket, &staging, bytes) {
            discard_staged(storage, &location.bucket, &staged);
            return Err(EtlError::sink(e));
        }
        staged.push(staging);
    }

    if options.overwrite == OverwriteMode::Dynamic {
        let dirs: BTreeSet<&str> = pending.iter().map(|p| p.partition.as_str()).collect();
        for dir in dirs {
            match clear_partition(storage, &location, dir) {
                Ok(removed) => report.replaced_objects += removed,
                Err(e) => {
                    discard_staged(storage, &location.bucket, &staged);
                    return Err(e);
                }
            }
        }
    }

    for ((file, (relative, bytes)), staging) in pending.iter().zip(&encoded).zip(&staged) {
        let key = location.key(relative);
        storage
            .rename_object(&location.bucket, staging, &key)
            .map_err(EtlError::sink)?;
        debug!(key = %key, rows = file.records.len(), bytes = bytes.len(), "wrote parquet object");
        report.rows_written += file.records.len();
        report.files.push(WrittenFile {
            key,
            partition: file.partition.clone(),
            rows: file.records.len(),
        });
    }

    info!(
        ctx = %options.transformation_ctx,
        location = %location,
        files = report.files.len(),
        rows = report.rows_written,
        replaced = report.replaced_objects,
        "sink write complete"
    );
    Ok(report)
}

/// Remove staged objects of an aborted write.
fn discard_staged(storage: &dyn ObjectIO, bucket: &str, staged: &[String]) {
    for key in staged {
        if let Err(e) = storage.delete_object(bucket, key) {
            warn!(key = %key, error = %e, "could not remove staged object");
        }
    }
}

/// Delete the `part-` objects directly under one partition directory.
fn clear_partition(storage: &dyn ObjectIO, location: &ObjectLocation, dir: &str) -> Result<usize> {
    let prefix = location.key(&format!("{dir}/"));
    let existing = storage
        .list_objects(&location.bucket, Some(&prefix))
        .map_err(EtlError::sink)?;
    let mut removed = 0;
    for obj in existing {
        let Some(rest) = obj.key.strip_prefix(&prefix) else {
            continue;
        };
        if rest.starts_with("part-") && !rest.contains('/') {
            storage
                .delete_object(&location.bucket, &obj.key)
                .map_err(EtlError::sink)?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(partition = dir, removed, "cleared partition for overwrite");
    }
    Ok(removed)
}
