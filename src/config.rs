//! Layered job configuration.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults (the production job's constants)
//! 2. A TOML file: the explicit path, else `$TRENDING_ETL_CONFIG`, else
//!    `trending-etl.toml` in the working directory if it exists
//! 3. Environment variables prefixed with `TRENDING_ETL_`, nested with `__`
//!    (`TRENDING_ETL_SINK__PATH`, `TRENDING_ETL_QUALITY__STRATEGY`, …)

use crate::error::{EtlError, Result};
use crate::quality::{DEFAULT_RULESET, ObservationScope, PublishingStrategy, QualityOptions};
use crate::sink::SinkOptions;
use crate::storage::ObjectLocation;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "TRENDING_ETL_";
pub const CONFIG_PATH_ENV: &str = "TRENDING_ETL_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "trending-etl.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Default log filter; `RUST_LOG` wins when set.
    pub log_level: String,
    pub log_format: LogFormat,
    pub catalog: CatalogConfig,
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub sink: SinkOptions,
    pub quality: QualityConfig,
    pub bookmarks: BookmarkConfig,
    pub execution: ExecutionConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            catalog: CatalogConfig::default(),
            source: SourceConfig::default(),
            storage: StorageConfig::default(),
            sink: SinkOptions::default(),
            quality: QualityConfig::default(),
            bookmarks: BookmarkConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON catalog document.
    pub path: PathBuf,
    pub database: String,
    pub table: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("catalog.json"),
            database: "de-youtube-raw".to_string(),
            table: "raw_statistics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub push_down_predicate: String,
    pub transformation_ctx: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            push_down_predicate: "region in ('ca','gb','us')".to_string(),
            transformation_ctx: "datasource0".to_string(),
        }
    }
}

/// Local object store: `scheme://bucket/key` lives at `<root>/bucket/key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub ruleset: String,
    pub evaluation_context: String,
    pub enable_results_publishing: bool,
    pub strategy: PublishingStrategy,
    pub observation_scope: ObservationScope,
    /// Directory receiving `<context>.jsonl` metric points.
    pub metrics_dir: PathBuf,
    /// Optional location URI for JSON copies of each report.
    pub results_path: Option<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let options = QualityOptions::default();
        Self {
            ruleset: DEFAULT_RULESET.to_string(),
            evaluation_context: options.evaluation_context,
            enable_results_publishing: options.enable_results_publishing,
            strategy: options.strategy,
            observation_scope: options.observation_scope,
            metrics_dir: PathBuf::from("metrics"),
            results_path: None,
        }
    }
}

impl QualityConfig {
    #[must_use]
    pub fn options(&self) -> QualityOptions {
        QualityOptions {
            evaluation_context: self.evaluation_context.clone(),
            enable_results_publishing: self.enable_results_publishing,
            strategy: self.strategy,
            observation_scope: self.observation_scope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkConfig {
    pub enabled: bool,
    /// One `<job name>.json` per job.
    pub dir: PathBuf,
}

impl Default for BookmarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("bookmarks"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads for partition-parallel stages; the global rayon pool
    /// when unset.
    pub threads: Option<usize>,
}

impl JobConfig {
    /// The provider stack without extracting it.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(JobConfig::default()));

        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            figment = figment.merge(Toml::file(&file));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the configuration.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] if an explicit file is missing, a source
    /// fails to parse, or the result does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path
            && !p.exists()
        {
            return Err(EtlError::Config(format!(
                "config file {} does not exist",
                p.display()
            )));
        }
        Self::from_figment(&Self::figment(path))
    }

    /// Extract and validate from an arbitrary provider stack.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] on extraction or validation failure.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: JobConfig = figment
            .extract()
            .map_err(|e| EtlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EtlError::Config(msg));
        if self.catalog.database.trim().is_empty() || self.catalog.table.trim().is_empty() {
            return invalid("catalog.database and catalog.table must be set".to_string());
        }
        if self.sink.output_units == 0 {
            return invalid("sink.output_units must be at least 1".to_string());
        }
        if let Err(e) = ObjectLocation::parse(&self.sink.path) {
            return invalid(format!("sink.path: {e}"));
        }
        if let Some(results) = &self.quality.results_path
            && let Err(e) = ObjectLocation::parse(results)
        {
            return invalid(format!("quality.results_path: {e}"));
        }
        if self.execution.threads == Some(0) {
            return invalid("execution.threads must be at least 1".to_string());
        }
        if let ObservationScope::Sample(0) = self.quality.observation_scope {
            return invalid("quality.observation_scope sample size must be at least 1".to_string());
        }
        Ok(())
    }
}
