//! Job driver: Init → Read → Map → Resolve → Prune → QualityCheck →
//! Coalesce → Write → Commit.
//!
//! A job is initialised with its name, configuration and the external
//! services, runs the pipeline once and commits. The bookmark written at
//! commit is the only state carried between runs, and it exists only for
//! runs that committed.

use crate::catalog::{Catalog, MemoryCatalog, SourceRequest, read_table, verify_pushdown};
use crate::config::JobConfig;
use crate::error::{EtlError, Result};
use crate::predicate::Predicate;
use crate::quality::{PublishingStrategy, QualityGate, QualityReport, ResultsTarget};
use crate::sink::{SinkReport, write_partitioned};
use crate::storage::{LocalMetricIO, LocalObjectIO, MetricIO, ObjectIO, ObjectLocation};
use crate::transforms::{
    ChoiceResolution, TRENDING_MAPPINGS, apply_mapping, drop_null_fields, null_field_paths,
    resolve_choice,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

pub const MAPPING_CTX: &str = "applymapping1";
pub const RESOLVE_CTX: &str = "resolvechoice2";
pub const PRUNE_CTX: &str = "dropnullfields3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Read,
    Map,
    Resolve,
    Prune,
    QualityCheck,
    Coalesce,
    Write,
    Commit,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// External collaborators of a run.
#[derive(Clone)]
pub struct JobServices {
    pub catalog: Arc<dyn Catalog>,
    pub storage: Arc<dyn ObjectIO>,
    pub metrics: Arc<dyn MetricIO>,
}

impl JobServices {
    /// Filesystem-backed services described by `config`.
    ///
    /// # Errors
    /// Returns [`EtlError::Catalog`] if the catalog document cannot be loaded.
    pub fn local(config: &JobConfig) -> Result<Self> {
        Ok(Self {
            catalog: Arc::new(MemoryCatalog::from_file(&config.catalog.path)?),
            storage: Arc::new(LocalObjectIO::new(&config.storage.root)),
            metrics: Arc::new(LocalMetricIO::new(&config.quality.metrics_dir)),
        })
    }
}

/// Persisted at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobBookmark {
    pub job_name: String,
    pub run_id: Uuid,
    pub committed_at: DateTime<Utc>,
    pub transformation_contexts: Vec<String>,
    pub rows_written: usize,
    pub files: Vec<String>,
}

impl JobBookmark {
    /// Read a bookmark file.
    ///
    /// # Errors
    /// Returns [`EtlError::Bookmark`] if the file is unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EtlError::Bookmark(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| EtlError::Bookmark(format!("parse {}: {e}", path.display())))
    }
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_name: String,
    pub run_id: Uuid,
    pub rows_read: usize,
    pub source_partitions: usize,
    pub dropped_fields: Vec<String>,
    pub quality: QualityReport,
    pub quality_problems: Vec<String>,
    pub sink: SinkReport,
    /// Set once the run is committed.
    pub bookmark: Option<PathBuf>,
}

pub struct Job {
    name: String,
    run_id: Uuid,
    config: JobConfig,
    services: JobServices,
    pool: Option<rayon::ThreadPool>,
    stage: Mutex<Stage>,
    pending: Option<RunSummary>,
}

impl Job {
    /// Validate the job name and configuration and prepare the worker pool.
    ///
    /// # Errors
    /// Returns [`EtlError::Config`] for an unusable name, configuration or pool.
    pub fn init(name: impl Into<String>, config: JobConfig, services: JobServices) -> Result<Self> {
        let name = name.into();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
        {
            return Err(EtlError::Config(format!("invalid job name `{name}`")));
        }
        config.validate()?;

        let pool = match config.execution.threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("trending-etl-{i}"))
                    .build()
                    .map_err(|e| EtlError::Config(format!("worker pool: {e}")))?,
            ),
            None => None,
        };

        let run_id = Uuid::new_v4();
        info!(
            job = %name,
            run_id = %run_id,
            threads = config.execution.threads.unwrap_or_else(num_cpus::get),
            "job initialised"
        );
        Ok(Self {
            name,
            run_id,
            config,
            services,
            pool,
            stage: Mutex::new(Stage::Init),
            pending: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Last stage entered.
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.lock().expect("stage mutex poisoned")
    }

    fn enter(&self, stage: Stage) {
        *self.stage.lock().expect("stage mutex poisoned") = stage;
        info!(job = %self.name, %stage, "entering stage");
    }

    /// Path of this job's bookmark file.
    #[must_use]
    pub fn bookmark_path(&self) -> PathBuf {
        self.config.bookmarks.dir.join(format!("{}.json", self.name))
    }

    /// Run every stage up to and including the write.
    ///
    /// # Errors
    /// Returns the first fatal stage error; nothing is committed.
    pub fn run(&mut self) -> Result<&RunSummary> {
        let result = match &self.pool {
            Some(pool) => pool.install(|| self.stages()),
            None => self.stages(),
        };
        match result {
            Ok(summary) => Ok(self.pending.insert(summary)),
            Err(e) => {
                error!(job = %self.name, stage = %self.stage(), error = %e, "job failed");
                Err(e)
            }
        }
    }

    fn stages(&self) -> Result<RunSummary> {
        let cfg = &self.config;

        self.enter(Stage::Read);
        let request = SourceRequest {
            database: &cfg.catalog.database,
            table: &cfg.catalog.table,
            push_down_predicate: &cfg.source.push_down_predicate,
            transformation_ctx: &cfg.source.transformation_ctx,
        };
        let source = read_table(
            self.services.catalog.as_ref(),
            self.services.storage.as_ref(),
            &request,
        )?;
        // Checked here: mapping drops partition columns outside the output schema.
        let predicate = if cfg.source.push_down_predicate.trim().is_empty() {
            Predicate::always()
        } else {
            Predicate::parse(&cfg.source.push_down_predicate).map_err(|e| {
                EtlError::InvalidPredicate {
                    predicate: cfg.source.push_down_predicate.clone(),
                    reason: e.to_string(),
                }
            })?
        };
        verify_pushdown(&source, &predicate)?;
        let rows_read = source.num_rows();
        let source_partitions = source.num_partitions();

        self.enter(Stage::Map);
        let mapped = apply_mapping(&source, TRENDING_MAPPINGS, MAPPING_CTX);
        drop(source);

        self.enter(Stage::Resolve);
        let resolved = resolve_choice(mapped, ChoiceResolution::MakeStruct, RESOLVE_CTX);

        self.enter(Stage::Prune);
        let dropped_fields = null_field_paths(&resolved);
        let pruned = drop_null_fields(resolved, PRUNE_CTX);

        self.enter(Stage::QualityCheck);
        let gate = QualityGate::new(cfg.quality.ruleset.clone(), cfg.quality.options());
        let results = match &cfg.quality.results_path {
            Some(uri) => Some(ResultsTarget {
                storage: self.services.storage.as_ref(),
                location: ObjectLocation::parse(uri)
                    .map_err(|e| EtlError::Config(format!("quality.results_path: {e}")))?,
            }),
            None => None,
        };
        let outcome = gate.process(&pruned, self.services.metrics.as_ref(), results.as_ref());
        if cfg.quality.strategy == PublishingStrategy::Strict && !outcome.is_clean() {
            return Err(EtlError::QualityGate(outcome.problems().join("; ")));
        }

        self.enter(Stage::Coalesce);
        let coalesced = pruned.coalesce(cfg.sink.output_units);

        self.enter(Stage::Write);
        let sink = write_partitioned(coalesced, self.services.storage.as_ref(), &cfg.sink)?;

        Ok(RunSummary {
            job_name: self.name.clone(),
            run_id: self.run_id,
            rows_read,
            source_partitions,
            dropped_fields,
            quality_problems: outcome.problems(),
            quality: outcome.report,
            sink,
            bookmark: None,
        })
    }

    /// Persist the bookmark of a successful run.
    ///
    /// # Errors
    /// Returns [`EtlError::Bookmark`] if no run succeeded or the bookmark
    /// cannot be written.
    pub fn commit(mut self) -> Result<RunSummary> {
        let Some(mut summary) = self.pending.take() else {
            return Err(EtlError::Bookmark(
                "commit requires a successful run".to_string(),
            ));
        };
        self.enter(Stage::Commit);

        if self.config.bookmarks.enabled {
            let bookmark = JobBookmark {
                job_name: self.name.clone(),
                run_id: self.run_id,
                committed_at: Utc::now(),
                transformation_contexts: vec![
                    self.config.source.transformation_ctx.clone(),
                    MAPPING_CTX.to_string(),
                    RESOLVE_CTX.to_string(),
                    PRUNE_CTX.to_string(),
                    self.config.sink.transformation_ctx.clone(),
                ],
                rows_written: summary.sink.rows_written,
                files: summary.sink.files.iter().map(|f| f.key.clone()).collect(),
            };
            let path = self.bookmark_path();
            write_bookmark(&path, &bookmark)?;
            summary.bookmark = Some(path);
        }

        self.enter(Stage::Committed);
        info!(
            job = %self.name,
            run_id = %self.run_id,
            rows_read = summary.rows_read,
            rows_written = summary.sink.rows_written,
            files = summary.sink.files.len(),
            "job committed"
        );
        Ok(summary)
    }

    /// `init`, `run` and `commit` in one call.
    ///
    /// # Errors
    /// Returns the first error of any step.
    pub fn execute(
        name: impl Into<String>,
        config: JobConfig,
        services: JobServices,
    ) -> Result<RunSummary> {
        let mut job = Self::init(name, config, services)?;
        job.run()?;
        job.commit()
    }
}

fn write_bookmark(path: &Path, bookmark: &JobBookmark) -> Result<()> {
    let err = |what: &str, e: &dyn fmt::Display| {
        EtlError::Bookmark(format!("{what} {}: {e}", path.display()))
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| err("create directory for", &e))?;
    }
    let body = serde_json::to_vec_pretty(bookmark).map_err(|e| err("serialize", &e))?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, body).map_err(|e| err("write", &e))?;
    std::fs::rename(&staging, path).map_err(|e| err("move into place", &e))
}
