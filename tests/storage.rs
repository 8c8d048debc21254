use std::collections::HashMap;
use trending_etl::storage::{
    ErrorKind, FakeMetricIO, FakeObjectIO, LocalMetricIO, LocalObjectIO, MetricIO, MetricPoint,
    ObjectIO, ObjectLocation,
};

fn point(name: &str, value: f64) -> MetricPoint {
    MetricPoint {
        name: name.to_string(),
        value,
        timestamp: 1_700_000_000,
        tags: HashMap::from([("context".to_string(), "DQContext".to_string())]),
    }
}

#[test]
fn parses_location_uris() -> anyhow::Result<()> {
    let loc = ObjectLocation::parse("s3://de-cleansed/youtube/raw_statistics")?;
    assert_eq!(loc.scheme, "s3");
    assert_eq!(loc.bucket, "de-cleansed");
    assert_eq!(loc.prefix, "youtube/raw_statistics/");
    assert_eq!(loc.key("region=ca/part.parquet"), "youtube/raw_statistics/region=ca/part.parquet");
    assert_eq!(loc.child("region=ca").prefix, "youtube/raw_statistics/region=ca/");
    assert_eq!(loc.to_string(), "s3://de-cleansed/youtube/raw_statistics/");

    let bare = ObjectLocation::parse("GS://bucket")?;
    assert_eq!(bare.scheme, "gs");
    assert_eq!(bare.prefix, "");
    assert_eq!(bare.key("/file"), "file");

    for bad in ["bucket/prefix", "://bucket", "s3://", "s3:///"] {
        let err = ObjectLocation::parse(bad).expect_err(bad);
        assert_eq!(err.kind, ErrorKind::InvalidInput, "{bad}");
    }
    Ok(())
}

#[test]
fn local_objects_round_trip_under_the_root() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let io = LocalObjectIO::new(tmp.path());

    io.put_object("bucket", "a/b/one.csv", b"1")?;
    io.put_object("bucket", "a/two.csv", b"22")?;
    io.put_object("bucket", "z.csv", b"333")?;
    assert!(tmp.path().join("bucket/a/b/one.csv").is_file());
    assert_eq!(io.get_object("bucket", "a/two.csv")?, b"22");
    assert!(io.object_exists("bucket", "z.csv")?);
    assert!(!io.object_exists("bucket", "missing.csv")?);

    let all: Vec<String> = io.list_objects("bucket", None)?.into_iter().map(|o| o.key).collect();
    assert_eq!(all, vec!["a/b/one.csv", "a/two.csv", "z.csv"]);

    let under_a = io.list_objects("bucket", Some("a/"))?;
    assert_eq!(under_a.len(), 2);
    assert_eq!(under_a[1].size, 2);
    Ok(())
}

#[test]
fn local_missing_objects_and_buckets() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let io = LocalObjectIO::new(tmp.path());

    let err = io.get_object("bucket", "nope").expect_err("missing object");
    assert_eq!(err.kind, ErrorKind::NotFound);
    io.delete_object("bucket", "nope")?;
    assert!(io.list_objects("no-such-bucket", None)?.is_empty());
    Ok(())
}

#[test]
fn local_rename_moves_objects() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let io = LocalObjectIO::new(tmp.path());

    io.put_object("bucket", "_temporary/ctx/region=ca/part-0.parquet", b"data")?;
    io.rename_object(
        "bucket",
        "_temporary/ctx/region=ca/part-0.parquet",
        "region=ca/part-0.parquet",
    )?;
    assert_eq!(io.get_object("bucket", "region=ca/part-0.parquet")?, b"data");
    assert!(!io.object_exists("bucket", "_temporary/ctx/region=ca/part-0.parquet")?);
    Ok(())
}

#[test]
fn local_keys_cannot_escape_the_root() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let io = LocalObjectIO::new(tmp.path().join("root"));

    for (bucket, key) in [("bucket", "../outside"), ("..", "x"), ("", "x"), ("bucket", "/abs")] {
        let err = io.put_object(bucket, key, b"x").expect_err(key);
        assert_eq!(err.kind, ErrorKind::InvalidInput, "{bucket}/{key}");
    }
    assert!(!tmp.path().join("outside").exists());
    Ok(())
}

#[test]
fn local_metrics_append_json_lines() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let metrics = LocalMetricIO::new(tmp.path().join("metrics"));

    metrics.put_metrics("DQContext", vec![point("dq.rule", 1.0), point("dq.passed", 1.0)])?;
    metrics.put_metric("DQContext", point("dq.row_count", 3.0))?;

    let text = std::fs::read_to_string(metrics.namespace_path("DQContext"))?;
    let points = text
        .lines()
        .map(serde_json::from_str::<MetricPoint>)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(points.len(), 3);
    assert_eq!(points[2], point("dq.row_count", 3.0));
    Ok(())
}

#[test]
fn fake_storage_is_shared_between_clones() -> anyhow::Result<()> {
    let storage = FakeObjectIO::new();
    let handle = storage.clone();
    handle.put_object("b", "k/1", b"v")?;
    handle.copy_object("b", "k/1", "c", "k/2")?;

    assert_eq!(storage.get_object("c", "k/2")?, b"v");
    assert_eq!(storage.keys("b"), vec!["k/1"]);
    assert!(storage.list_objects("b", Some("x/"))?.is_empty());
    Ok(())
}

#[test]
fn fake_storage_can_reject_writes() -> anyhow::Result<()> {
    let storage = FakeObjectIO::new();
    storage.put_object("b", "kept", b"v")?;
    storage.set_fail_writes(true);

    let err = storage.put_object("b", "new", b"v").expect_err("writes rejected");
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert!(storage.delete_object("b", "kept").is_err());
    assert!(storage.rename_object("b", "kept", "moved").is_err());
    // Reads still work.
    assert_eq!(storage.get_object("b", "kept")?, b"v");

    storage.set_fail_writes(false);
    storage.rename_object("b", "kept", "moved")?;
    assert_eq!(storage.keys("b"), vec!["moved"]);
    Ok(())
}

#[test]
fn fake_metrics_record_or_refuse_points() {
    let metrics = FakeMetricIO::new();
    assert!(metrics.put_metric("ns", point("a", 1.0)).is_ok());
    metrics.set_unavailable(true);
    let err = metrics.put_metric("ns", point("b", 2.0)).expect_err("unavailable");
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(metrics.points("ns"), vec![point("a", 1.0)]);
    assert!(metrics.points("other").is_empty());
}
