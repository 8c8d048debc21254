//! End-to-end runs of the job against in-memory services.

use trending_etl::io::parquet::parquet_columns;
use trending_etl::job::{Job, JobBookmark, Stage};
use trending_etl::quality::PublishingStrategy;
use trending_etl::storage::ObjectIO;
use trending_etl::testing::{
    OUTPUT_BUCKET, OUTPUT_PREFIX, TestEnvironment, raw_columns, raw_table_definition,
    raw_trending_record, records_to_csv,
};
use trending_etl::{EtlError, Value};

const CA_FILE: &str = "region=ca/part-00000-datasink4.snappy.parquet";
const US_FILE: &str = "region=us/part-00000-datasink4.snappy.parquet";

fn seed_three_regions(env: &TestEnvironment) -> anyhow::Result<()> {
    env.put_csv(
        "ca",
        "CAvideos.csv",
        &[raw_trending_record("c1", 1_000), raw_trending_record("c2", 2_000)],
    )?;
    env.put_csv("us", "USvideos.csv", &[raw_trending_record("u1", 5_000)])?;
    env.put_csv("de", "DEvideos.csv", &[raw_trending_record("d1", 9_000)])?;
    Ok(())
}

fn output_columns(env: &TestEnvironment, relative: &str) -> anyhow::Result<Vec<String>> {
    let body = env
        .storage
        .get_object(OUTPUT_BUCKET, &format!("{OUTPUT_PREFIX}{relative}"))?;
    Ok(parquet_columns(body)?.into_iter().map(|(name, _)| name).collect())
}

#[test]
fn writes_one_file_per_selected_region() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;

    let summary = Job::execute("trending", env.config(tmp.path()), env.services())?;

    assert_eq!(env.output_keys(), vec![CA_FILE, US_FILE]);
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.source_partitions, 2);
    assert_eq!(summary.sink.rows_written, 3);
    assert!(summary.dropped_fields.is_empty());
    assert!(summary.quality.passed);
    assert!(summary.quality_problems.is_empty());

    let ca = env.read_partition("region=ca")?;
    assert_eq!(ca.len(), 2);
    assert_eq!(ca[0].get("video_id"), &Value::from("c1"));
    assert_eq!(ca[0].get("views"), &Value::Long(1_000));
    assert_eq!(ca[0].get("ratings_disabled"), &Value::Boolean(false));

    let columns = output_columns(&env, CA_FILE)?;
    assert_eq!(columns.len(), 16);
    assert_eq!(columns[0], "video_id");
    assert!(!columns.contains(&"region".to_string()));
    Ok(())
}

#[test]
fn unparseable_cells_become_null() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    env.put_csv(
        "gb",
        "GBvideos.csv",
        &[
            raw_trending_record("g1", 100),
            raw_trending_record("g2", 200).with("category_id", "music"),
        ],
    )?;
    let tmp = tempfile::tempdir()?;

    Job::execute("trending", env.config(tmp.path()), env.services())?;

    let rows = env.read_partition("region=gb")?;
    assert_eq!(rows[0].get("category_id"), &Value::Long(24));
    assert_eq!(rows[1].get("category_id"), &Value::Null);
    Ok(())
}

#[test]
fn all_null_columns_are_left_out() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    env.put_csv(
        "ca",
        "CAvideos.csv",
        &[
            raw_trending_record("c1", 100).with("dislikes", Value::Null),
            raw_trending_record("c2", 200).with("dislikes", Value::Null),
        ],
    )?;
    env.put_csv(
        "us",
        "USvideos.csv",
        &[raw_trending_record("u1", 300).with("dislikes", Value::Null)],
    )?;
    let tmp = tempfile::tempdir()?;

    let summary = Job::execute("trending", env.config(tmp.path()), env.services())?;

    assert_eq!(summary.dropped_fields, vec!["dislikes"]);
    let columns = output_columns(&env, US_FILE)?;
    assert_eq!(columns.len(), 15);
    assert!(!columns.contains(&"dislikes".to_string()));
    assert!(columns.contains(&"likes".to_string()));
    Ok(())
}

#[test]
fn failing_rules_do_not_stop_a_best_effort_run() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.quality.ruleset = "Rules = [ RowCount > 1000 ]".to_string();

    let summary = Job::execute("trending", config, env.services())?;

    assert!(!summary.quality.passed);
    assert_eq!(summary.quality_problems.len(), 1);
    assert_eq!(env.output_keys().len(), 2);
    assert!(summary.bookmark.is_some());

    let points = env.metrics.points("DQContext");
    assert!(points.iter().any(|p| p.name == "dq.passed" && p.value == 0.0));
    Ok(())
}

#[test]
fn strict_quality_failures_abort_before_writing() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.quality.ruleset = "Rules = [ RowCount > 1000 ]".to_string();
    config.quality.strategy = PublishingStrategy::Strict;

    let mut job = Job::init("trending", config, env.services())?;
    let err = job.run().expect_err("gate fails");
    assert!(matches!(err, EtlError::QualityGate(_)));
    assert_eq!(job.stage(), Stage::QualityCheck);
    assert!(env.output_keys().is_empty());
    assert!(!job.bookmark_path().exists());
    Ok(())
}

#[test]
fn missing_tables_fail_without_side_effects() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.catalog.table = "raw_statistics_v2".to_string();

    let mut job = Job::init("trending", config, env.services())?;
    let bookmark = job.bookmark_path();
    let err = job.run().expect_err("table is missing");
    assert!(matches!(err, EtlError::TableNotFound { .. }));
    assert_eq!(job.stage(), Stage::Read);

    let err = job.commit().expect_err("nothing to commit");
    assert!(matches!(err, EtlError::Bookmark(_)));
    assert!(!bookmark.exists());
    assert!(env.output_keys().is_empty());
    Ok(())
}

#[test]
fn invalid_predicates_fail_the_read() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.source.push_down_predicate = "region in ('ca',".to_string();

    let err = Job::execute("trending", config, env.services()).expect_err("bad predicate");
    assert!(matches!(err, EtlError::InvalidPredicate { .. }));
    assert!(env.output_keys().is_empty());
    Ok(())
}

#[test]
fn predicates_may_use_partition_keys_outside_the_output() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    let mut table = raw_table_definition();
    table.partition_keys = vec!["region".to_string(), "year".to_string()];
    env.catalog.register(table);

    let columns = raw_columns();
    let names: Vec<&str> = columns.iter().map(|f| f.name.as_str()).collect();
    let current = records_to_csv(&names, &[raw_trending_record("c1", 100)])?;
    let older = records_to_csv(&names, &[raw_trending_record("c0", 50)])?;
    env.put_raw("region=ca/year=2018/CAvideos.csv", &current)?;
    env.put_raw("region=ca/year=2017/CAvideos.csv", &older)?;

    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.source.push_down_predicate = "region in ('ca','gb','us') and year = '2018'".to_string();

    let summary = Job::execute("trending", config, env.services())?;
    assert_eq!(summary.rows_read, 1);
    assert_eq!(env.output_keys(), vec![CA_FILE]);
    let rows = env.read_partition("region=ca")?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("video_id"), &Value::from("c1"));
    assert!(!rows[0].contains("year"));
    Ok(())
}

#[test]
fn an_unavailable_metric_sink_still_commits() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    env.metrics.set_unavailable(true);
    let tmp = tempfile::tempdir()?;

    let summary = Job::execute("trending", env.config(tmp.path()), env.services())?;

    assert!(summary.quality.passed);
    assert_eq!(summary.quality_problems.len(), 1);
    assert!(summary.quality_problems[0].starts_with("publishing failed"));
    assert_eq!(env.output_keys(), vec![CA_FILE, US_FILE]);
    assert!(summary.bookmark.is_some_and(|p| p.exists()));
    Ok(())
}

#[test]
fn an_empty_table_commits_without_output() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    let tmp = tempfile::tempdir()?;

    let summary = Job::execute("trending", env.config(tmp.path()), env.services())?;

    assert_eq!(summary.rows_read, 0);
    assert!(summary.sink.files.is_empty());
    assert_eq!(summary.dropped_fields.len(), 17);
    // ColumnCount > 0 fails on an empty schema, but only as a warning.
    assert!(!summary.quality.passed);
    assert!(env.output_keys().is_empty());
    assert!(summary.bookmark.is_some_and(|p| p.exists()));
    Ok(())
}

#[test]
fn reruns_replace_their_own_output() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;

    let first = Job::execute("trending", env.config(tmp.path()), env.services())?;
    let second = Job::execute("trending", env.config(tmp.path()), env.services())?;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.sink.replaced_objects, 2);
    assert_eq!(env.output_keys(), vec![CA_FILE, US_FILE]);
    assert_eq!(env.read_partition("region=ca")?.len(), 2);
    assert!(
        env.storage
            .keys(OUTPUT_BUCKET)
            .iter()
            .all(|k| !k.contains("_temporary"))
    );
    Ok(())
}

#[test]
fn commit_writes_the_bookmark() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;

    let mut job = Job::init("trending", env.config(tmp.path()), env.services())?;
    assert_eq!(job.stage(), Stage::Init);
    let run_id = job.run_id();
    job.run()?;
    assert_eq!(job.stage(), Stage::Write);
    let summary = job.commit()?;

    let path = tmp.path().join("trending.json");
    assert_eq!(summary.bookmark.as_deref(), Some(path.as_path()));
    let bookmark = JobBookmark::load(&path)?;
    assert_eq!(bookmark.job_name, "trending");
    assert_eq!(bookmark.run_id, run_id);
    assert_eq!(bookmark.rows_written, 3);
    assert_eq!(
        bookmark.transformation_contexts,
        vec![
            "datasource0",
            "applymapping1",
            "resolvechoice2",
            "dropnullfields3",
            "datasink4"
        ]
    );
    assert_eq!(
        bookmark.files,
        vec![
            format!("{OUTPUT_PREFIX}{CA_FILE}"),
            format!("{OUTPUT_PREFIX}{US_FILE}"),
        ]
    );
    assert!(!tmp.path().join("trending.json.tmp").exists());
    Ok(())
}

#[test]
fn disabled_bookmarks_are_not_written() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.bookmarks.enabled = false;

    let summary = Job::execute("trending", config, env.services())?;
    assert!(summary.bookmark.is_none());
    assert!(!tmp.path().join("trending.json").exists());
    Ok(())
}

#[test]
fn runs_on_a_dedicated_pool() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.execution.threads = Some(2);
    config.sink.output_units = 2;

    let summary = Job::execute("trending", config, env.services())?;
    assert_eq!(summary.sink.rows_written, 3);
    assert_eq!(env.output_keys().len(), 2);
    Ok(())
}

#[test]
fn quality_reports_can_be_kept_in_storage() -> anyhow::Result<()> {
    let env = TestEnvironment::new();
    seed_three_regions(&env)?;
    let tmp = tempfile::tempdir()?;
    let mut config = env.config(tmp.path());
    config.quality.results_path = Some("s3://dq-results/trending/".to_string());

    Job::execute("trending", config, env.services())?;
    let reports = env.storage.keys("dq-results");
    assert_eq!(reports.len(), 1);
    assert!(reports[0].starts_with("trending/DQContext/"));
    Ok(())
}

#[test]
fn rejects_unusable_job_names() {
    let env = TestEnvironment::new();
    let tmp = std::env::temp_dir();
    for name in ["", ".hidden", "a/b", "a\\b"] {
        let err = Job::init(name, env.config(&tmp), env.services()).err();
        assert!(matches!(err, Some(EtlError::Config(_))), "{name:?}");
    }
}

#[test]
fn invalid_configuration_is_rejected_at_init() {
    let env = TestEnvironment::new();
    let mut config = env.config(&std::env::temp_dir());
    config.sink.output_units = 0;
    assert!(matches!(
        Job::init("trending", config, env.services()),
        Err(EtlError::Config(_))
    ));
}
