//! Fixtures for exercising the job against in-memory services.
//!
//! ```
//! use trending_etl::testing::{TestEnvironment, raw_trending_record};
//!
//! let env = TestEnvironment::new();
//! env.put_csv("ca", "CAvideos.csv", &[raw_trending_record("v1", 10)]).unwrap();
//! assert_eq!(env.storage.keys(trending_etl::testing::RAW_BUCKET).len(), 1);
//! ```

use crate::catalog::{MemoryCatalog, SourceFormat, TableDefinition};
use crate::config::JobConfig;
use crate::io::parquet::decode_parquet;
use crate::job::JobServices;
use crate::record::Record;
use crate::storage::{FakeMetricIO, FakeObjectIO, ObjectIO};
use crate::transforms::TRENDING_MAPPINGS;
use crate::value::Field;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

pub const RAW_BUCKET: &str = "raw-bucket";
pub const RAW_PREFIX: &str = "youtube/raw_statistics/";
pub const OUTPUT_BUCKET: &str = "cleansed-bucket";
pub const OUTPUT_PREFIX: &str = "youtube/raw_statistics/";

/// Raw columns in export order (the region lives in the object key).
#[must_use]
pub fn raw_columns() -> Vec<Field> {
    TRENDING_MAPPINGS
        .iter()
        .filter(|m| m.source != "region")
        .map(|m| Field::new(m.source, m.source_type.clone()))
        .collect()
}

/// A plausible raw trending row with every column populated.
#[must_use]
pub fn raw_trending_record(video_id: &str, views: i64) -> Record {
    Record::new()
        .with("video_id", video_id)
        .with("trending_date", "17.14.11")
        .with("title", format!("Video {video_id}"))
        .with("channel_title", "Some Channel")
        .with("category_id", 24_i64)
        .with("publish_time", "2017-11-13T17:13:01.000Z")
        .with("tags", "\"tag one\"|\"tag two\"")
        .with("views", views)
        .with("likes", views / 10)
        .with("dislikes", views / 100)
        .with("comment_count", views / 50)
        .with("thumbnail_link", format!("https://i.ytimg.com/vi/{video_id}/default.jpg"))
        .with("comments_disabled", false)
        .with("ratings_disabled", false)
        .with("video_error_or_removed", false)
        .with("description", "A description")
}

/// Catalog entry for the raw CSV table at `raw-bucket/youtube/raw_statistics/`.
#[must_use]
pub fn raw_table_definition() -> TableDefinition {
    TableDefinition {
        database: "de-youtube-raw".to_string(),
        name: "raw_statistics".to_string(),
        location: format!("s3://{RAW_BUCKET}/{RAW_PREFIX}"),
        format: SourceFormat::Csv,
        delimiter: b',',
        columns: raw_columns(),
        partition_keys: vec!["region".to_string()],
    }
}

/// Render records as CSV with a header row; null cells are empty.
///
/// # Errors
/// Returns an error if the CSV writer fails.
#[cfg(feature = "io-csv")]
pub fn records_to_csv(columns: &[&str], records: &[Record]) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(columns).context("write CSV header")?;
    for record in records {
        wtr.write_record(columns.iter().map(|c| record.get(c).to_text()))
            .context("write CSV row")?;
    }
    wtr.into_inner().context("flush CSV writer")
}

/// Fake catalog, object store and metric sink wired for the raw table.
#[derive(Clone)]
pub struct TestEnvironment {
    pub catalog: Arc<MemoryCatalog>,
    pub storage: FakeObjectIO,
    pub metrics: FakeMetricIO,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    #[must_use]
    pub fn new() -> Self {
        let catalog = MemoryCatalog::new();
        catalog.register(raw_table_definition());
        Self {
            catalog: Arc::new(catalog),
            storage: FakeObjectIO::new(),
            metrics: FakeMetricIO::new(),
        }
    }

    #[must_use]
    pub fn services(&self) -> JobServices {
        JobServices {
            catalog: self.catalog.clone(),
            storage: Arc::new(self.storage.clone()),
            metrics: Arc::new(self.metrics.clone()),
        }
    }

    /// Default configuration pointed at the fake buckets, keeping bookmarks
    /// under `bookmark_dir`.
    #[must_use]
    pub fn config(&self, bookmark_dir: &Path) -> JobConfig {
        let mut config = JobConfig::default();
        config.sink.path = format!("s3://{OUTPUT_BUCKET}/{OUTPUT_PREFIX}");
        config.bookmarks.dir = bookmark_dir.to_path_buf();
        config
    }

    /// Store raw rows as `region=<region>/<file>` in the raw table.
    ///
    /// # Errors
    /// Returns an error if encoding or the put fails.
    #[cfg(feature = "io-csv")]
    pub fn put_csv(&self, region: &str, file: &str, records: &[Record]) -> Result<()> {
        let columns: Vec<Field> = raw_columns();
        let names: Vec<&str> = columns.iter().map(|f| f.name.as_str()).collect();
        let body = records_to_csv(&names, records)?;
        self.put_raw(&format!("region={region}/{file}"), &body)
    }

    /// Store an arbitrary object under the raw table prefix.
    ///
    /// # Errors
    /// Returns an error if the put fails.
    pub fn put_raw(&self, relative: &str, body: &[u8]) -> Result<()> {
        self.storage
            .put_object(RAW_BUCKET, &format!("{RAW_PREFIX}{relative}"), body)
            .context("put raw object")
    }

    /// Output object keys, relative to the output prefix.
    #[must_use]
    pub fn output_keys(&self) -> Vec<String> {
        self.storage
            .keys(OUTPUT_BUCKET)
            .into_iter()
            .filter_map(|k| k.strip_prefix(OUTPUT_PREFIX).map(str::to_string))
            .collect()
    }

    /// Decode one output object.
    ///
    /// # Errors
    /// Returns an error if the object is missing or not Parquet.
    pub fn read_output(&self, relative: &str) -> Result<Vec<Record>> {
        let bytes = self
            .storage
            .get_object(OUTPUT_BUCKET, &format!("{OUTPUT_PREFIX}{relative}"))
            .context("get output object")?;
        decode_parquet(bytes)
    }

    /// Rows of every output file of one partition directory, e.g. `region=ca`.
    ///
    /// # Errors
    /// Returns an error if any object cannot be decoded.
    pub fn read_partition(&self, dir: &str) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        for key in self.output_keys() {
            if key.starts_with(&format!("{dir}/")) {
                rows.extend(self.read_output(&key)?);
            }
        }
        Ok(rows)
    }
}
