use trending_etl::quality::{
    DEFAULT_RULESET, ObservationScope, PublishingStrategy, QualityGate, QualityOptions,
    QualityReport, ResultsTarget, Rule, RuleStatus, parse_ruleset,
};
use trending_etl::storage::{FakeMetricIO, FakeObjectIO, ObjectIO, ObjectLocation};
use trending_etl::{DataType, Dataset, Field, Record, Schema, Value};

fn three_rows() -> Dataset {
    Dataset::from_records(vec![
        Record::new().with("a", 1_i64).with("b", 10_i64),
        Record::new().with("a", 2_i64).with("b", Value::Null),
        Record::new().with("a", 3_i64).with("b", 30_i64),
    ])
}

fn statuses(report: &QualityReport) -> Vec<RuleStatus> {
    report.rules.iter().map(|r| r.status).collect()
}

#[test]
fn parses_the_default_ruleset() -> anyhow::Result<()> {
    let rules = parse_ruleset(DEFAULT_RULESET).map_err(anyhow::Error::msg)?;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].to_string(), "ColumnCount > 0");

    let multi = "
        Rules = [
            ColumnCount > 0,
            IsComplete \"video_id\"
        ]
    ";
    let rules = parse_ruleset(multi).map_err(anyhow::Error::msg)?;
    assert_eq!(rules[1], Rule::IsComplete("video_id".to_string()));
    Ok(())
}

#[test]
fn rejects_malformed_rulesets() {
    for bad in [
        "",
        "Rules = ColumnCount > 0",
        "Rules = [ ColumnCount > ]",
        "Rules = [ ColumnCount > 0",
        "Rules = [ ]",
        "Rules = [ IsComplete video_id ]",
        "Rules = [ ColumnCount > 0 ] trailing",
    ] {
        assert!(parse_ruleset(bad).is_err(), "accepted {bad:?}");
    }
}

#[test]
fn default_ruleset_passes_on_a_non_empty_schema() {
    let gate = QualityGate::new(DEFAULT_RULESET, QualityOptions::default());
    let report = gate.evaluate(&three_rows());
    assert!(report.passed);
    assert_eq!(statuses(&report), vec![RuleStatus::Passed]);
    assert_eq!(report.rules[0].message, "column count is 2");
    assert_eq!(report.evaluation_context, "DQContext");
}

#[test]
fn column_count_fails_on_an_empty_schema() {
    let gate = QualityGate::new(DEFAULT_RULESET, QualityOptions::default());
    let report = gate.evaluate(&Dataset::default());
    assert!(!report.passed);
    assert_eq!(statuses(&report), vec![RuleStatus::Failed]);
}

#[test]
fn evaluates_every_rule_type() {
    let ruleset = r#"Rules = [
        RowCount = 3,
        IsComplete "a",
        Completeness "b" >= 0.5,
        ColumnExists "zzz",
        IsComplete "missing",
        CustomSql "select 1"
    ]"#;
    let gate = QualityGate::new(ruleset, QualityOptions::default());
    let report = gate.evaluate(&three_rows());

    assert_eq!(
        statuses(&report),
        vec![
            RuleStatus::Passed,
            RuleStatus::Passed,
            RuleStatus::Passed,
            RuleStatus::Failed,
            RuleStatus::Error,
            RuleStatus::Error,
        ]
    );
    assert!(!report.passed);
    assert_eq!(report.observations.row_count, 3);
    assert_eq!(report.observations.column_count, 2);
    let b = report.observations.completeness["b"];
    assert!((b - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.problems().len(), 3);
}

#[test]
fn ruleset_errors_are_captured_not_returned() {
    let gate = QualityGate::new("Rules = [ ColumnCount >> 1 ]", QualityOptions::default());
    let report = gate.evaluate(&three_rows());
    assert!(!report.passed);
    assert!(report.ruleset_error.is_some());
    assert!(report.rules.is_empty());
}

#[test]
fn sample_scope_observes_a_prefix() {
    let options = QualityOptions {
        observation_scope: ObservationScope::Sample(1),
        ..QualityOptions::default()
    };
    let gate = QualityGate::new("Rules = [ IsComplete \"b\" ]", options);
    let ds = Dataset::new(
        Schema::new(vec![Field::new("a", DataType::Long), Field::new("b", DataType::Long)]),
        vec![vec![
            Record::new().with("a", 1_i64).with("b", 1_i64),
            Record::new().with("a", 2_i64),
        ]],
    );
    let report = gate.evaluate(&ds);
    assert_eq!(report.observations.observed_rows, 1);
    assert_eq!(report.observations.row_count, 2);
    assert!(report.passed);
}

#[test]
fn publishes_metric_points_to_the_context_namespace() {
    let metrics = FakeMetricIO::new();
    let gate = QualityGate::new(DEFAULT_RULESET, QualityOptions::default());
    let outcome = gate.process(&three_rows(), &metrics, None);
    assert!(outcome.is_clean());

    let points = metrics.points("DQContext");
    let rule = points
        .iter()
        .find(|p| p.name == "dq.rule")
        .expect("rule point");
    assert_eq!(rule.value, 1.0);
    assert_eq!(rule.tags.get("rule").map(String::as_str), Some("ColumnCount > 0"));
    assert!(points.iter().any(|p| p.name == "dq.passed" && p.value == 1.0));
    assert!(points.iter().any(|p| p.name == "dq.completeness"
        && p.tags.get("column").map(String::as_str) == Some("b")));
}

#[test]
fn publish_failures_land_in_the_outcome() {
    let metrics = FakeMetricIO::new();
    metrics.set_unavailable(true);
    let gate = QualityGate::new(DEFAULT_RULESET, QualityOptions::default());
    let outcome = gate.process(&three_rows(), &metrics, None);

    assert!(outcome.report.passed);
    assert!(outcome.publish_error.is_some());
    assert!(!outcome.is_clean());
    assert_eq!(outcome.problems().len(), 1);
}

#[test]
fn disabled_publishing_sends_nothing() {
    let metrics = FakeMetricIO::new();
    let options = QualityOptions {
        enable_results_publishing: false,
        strategy: PublishingStrategy::Strict,
        ..QualityOptions::default()
    };
    let gate = QualityGate::new(DEFAULT_RULESET, options);
    let outcome = gate.process(&three_rows(), &metrics, None);
    assert!(outcome.is_clean());
    assert!(metrics.points("DQContext").is_empty());
}

#[test]
fn writes_a_json_report_when_a_results_location_is_set() -> anyhow::Result<()> {
    let metrics = FakeMetricIO::new();
    let storage = FakeObjectIO::new();
    let target = ResultsTarget {
        storage: &storage,
        location: ObjectLocation::parse("s3://dq-results/reports/")?,
    };
    let gate = QualityGate::new(DEFAULT_RULESET, QualityOptions::default());
    let outcome = gate.process(&three_rows(), &metrics, Some(&target));
    assert!(outcome.is_clean());

    let keys = storage.keys("dq-results");
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("reports/DQContext/"));
    assert!(keys[0].ends_with(".json"));

    let body = storage.get_object("dq-results", &keys[0])?;
    let report: QualityReport = serde_json::from_slice(&body)?;
    assert_eq!(report.ruleset, DEFAULT_RULESET);
    assert_eq!(report.evaluated_at, outcome.report.evaluated_at);
    assert_eq!(report.rules, outcome.report.rules);
    assert!(report.passed);
    Ok(())
}
