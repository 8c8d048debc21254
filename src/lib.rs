//! # trending-etl
//!
//! A batch job that cleanses raw video-trending statistics. It reads the raw
//! table registered in a catalog, keeps only the configured regions, projects
//! every row onto a fixed 17-column schema, resolves ambiguous columns,
//! removes columns that are entirely null, runs a data quality gate and writes
//! the result as region-partitioned Parquet.
//!
//! ## Pipeline
//!
//! | Stage | Module |
//! |---|---|
//! | Read with push-down predicate | [`catalog::read_table`] |
//! | Field mapping and casts | [`transforms::apply_mapping`] |
//! | `make_struct` for ambiguous columns | [`transforms::resolve_choice`] |
//! | Drop all-null fields | [`transforms::drop_null_fields`] |
//! | Data quality gate | [`quality::QualityGate`] |
//! | Coalesce and partitioned write | [`sink::write_partitioned`] |
//! | Bookmark at commit | [`job::Job::commit`] |
//!
//! [`job::Job`] strings the stages together. Each stage takes a [`Dataset`]
//! and returns a new one; work inside a stage runs partition-parallel on
//! rayon.
//!
//! ## Running a job
//!
//! ```
//! use trending_etl::job::Job;
//! use trending_etl::testing::{TestEnvironment, raw_trending_record};
//!
//! # fn main() -> anyhow::Result<()> {
//! let env = TestEnvironment::new();
//! env.put_csv("ca", "CAvideos.csv", &[raw_trending_record("a1", 1_000)])?;
//! env.put_csv("de", "DEvideos.csv", &[raw_trending_record("d1", 2_000)])?;
//!
//! let bookmarks = std::env::temp_dir().join("trending-etl-doc-bookmarks");
//! let summary = Job::execute("doc-job", env.config(&bookmarks), env.services())?;
//! assert_eq!(summary.sink.rows_written, 1);
//! assert_eq!(env.output_keys(), vec!["region=ca/part-00000-datasink4.snappy.parquet"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `io-csv` / `io-jsonl` - raw source formats (Parquet sources are always supported)
//! - `compression-gzip` - transparent decompression of `.gz` source objects
//! - `parallel-io` - encode output files in parallel

pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod job;
pub mod logging;
pub mod predicate;
pub mod quality;
pub mod record;
pub mod sink;
pub mod storage;
pub mod testing;
pub mod transforms;
pub mod value;

pub use dataset::{Dataset, Schema};
pub use error::{EtlError, Result};
pub use record::Record;
pub use value::{DataType, Field, Value};
