use figment::providers::{Format, Toml};
use std::path::PathBuf;
use trending_etl::EtlError;
use trending_etl::config::{JobConfig, LogFormat};
use trending_etl::quality::{DEFAULT_RULESET, ObservationScope, PublishingStrategy};
use trending_etl::sink::{OverwriteMode, ParquetCompression};

fn with_toml(text: &str) -> trending_etl::Result<JobConfig> {
    JobConfig::from_figment(&JobConfig::figment(None).merge(Toml::string(text)))
}

#[test]
fn defaults_describe_the_production_job() -> anyhow::Result<()> {
    let config = JobConfig::default();
    config.validate()?;

    assert_eq!(config.catalog.database, "de-youtube-raw");
    assert_eq!(config.catalog.table, "raw_statistics");
    assert_eq!(config.source.push_down_predicate, "region in ('ca','gb','us')");
    assert_eq!(config.source.transformation_ctx, "datasource0");
    assert_eq!(
        config.sink.path,
        "s3://de-cleansed-project-us-east-1-dev/youtube/raw_statistics/"
    );
    assert_eq!(config.sink.partition_keys, vec!["region"]);
    assert_eq!(config.sink.transformation_ctx, "datasink4");
    assert_eq!(config.sink.compression, ParquetCompression::Snappy);
    assert_eq!(config.sink.overwrite, OverwriteMode::Dynamic);
    assert_eq!(config.sink.output_units, 1);
    assert_eq!(config.quality.ruleset, DEFAULT_RULESET);
    assert_eq!(config.quality.evaluation_context, "DQContext");
    assert!(config.quality.enable_results_publishing);
    assert_eq!(config.quality.strategy, PublishingStrategy::BestEffort);
    assert!(config.bookmarks.enabled);
    assert_eq!(config.execution.threads, None);
    assert_eq!(config.log_format, LogFormat::Text);
    Ok(())
}

#[test]
fn loads_an_explicit_toml_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("job.toml");
    std::fs::write(
        &path,
        r#"
log_level = "debug"
log_format = "json"

[catalog]
path = "/etc/trending/catalog.json"

[sink]
path = "s3://other-bucket/cleansed/"
compression = "zstd"
overwrite = "append"
output_units = 4

[quality]
strategy = "STRICT"
observation_scope = { SAMPLE = 1000 }

[execution]
threads = 2
"#,
    )?;

    let config = JobConfig::load(Some(&path))?;
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.catalog.path, PathBuf::from("/etc/trending/catalog.json"));
    // Untouched keys keep their defaults.
    assert_eq!(config.catalog.table, "raw_statistics");
    assert_eq!(config.sink.path, "s3://other-bucket/cleansed/");
    assert_eq!(config.sink.compression, ParquetCompression::Zstd);
    assert_eq!(config.sink.overwrite, OverwriteMode::Append);
    assert_eq!(config.sink.output_units, 4);
    assert_eq!(config.sink.transformation_ctx, "datasink4");
    assert_eq!(config.quality.strategy, PublishingStrategy::Strict);
    assert_eq!(config.quality.observation_scope, ObservationScope::Sample(1000));
    assert_eq!(config.execution.threads, Some(2));
    Ok(())
}

#[test]
fn missing_explicit_file_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let err = JobConfig::load(Some(&tmp.path().join("absent.toml"))).expect_err("no file");
    assert!(matches!(err, EtlError::Config(_)));
    Ok(())
}

#[test]
fn malformed_values_are_config_errors() {
    assert!(matches!(with_toml("[sink]\noutput_units = \"many\""), Err(EtlError::Config(_))));
    assert!(matches!(with_toml("[quality]\nstrategy = \"SOMETIMES\""), Err(EtlError::Config(_))));
}

#[test]
fn validation_rejects_unusable_settings() {
    for text in [
        "[sink]\noutput_units = 0",
        "[sink]\npath = \"not-a-uri\"",
        "[catalog]\ntable = \" \"",
        "[execution]\nthreads = 0",
        "[quality]\nobservation_scope = { SAMPLE = 0 }",
        "[quality]\nresults_path = \"nowhere\"",
    ] {
        match with_toml(text) {
            Err(EtlError::Config(_)) => {}
            other => panic!("{text:?} gave {other:?}"),
        }
    }
}

#[test]
fn results_path_is_optional() -> anyhow::Result<()> {
    let config = with_toml("[quality]\nresults_path = \"s3://dq-results/youtube/\"")?;
    assert_eq!(config.quality.results_path.as_deref(), Some("s3://dq-results/youtube/"));
    assert!(JobConfig::default().quality.results_path.is_none());
    Ok(())
}
