//! Data quality gate.
//!
//! Rulesets use a small DQDL-style syntax:
//!
//! ```text
//! Rules = [
//!     ColumnCount > 0,
//!     RowCount >= 1,
//!     IsComplete "video_id",
//!     ColumnExists "region",
//!     Completeness "views" > 0.95
//! ]
//! ```
//!
//! Evaluating a ruleset never fails: parse errors, unsupported rules and
//! rules over missing columns are captured in the [`QualityReport`]. The
//! report can then be published as metric points and as a JSON document.
//! Whether a failed gate stops the job is the caller's decision, see
//! [`PublishingStrategy`].

use crate::dataset::Dataset;
use crate::storage::{CloudResult, MetricIO, MetricPoint, ObjectIO, ObjectLocation};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Ruleset evaluated when none is configured.
pub const DEFAULT_RULESET: &str = "Rules = [ ColumnCount > 0 ]";

// ============================================================================
// Options
// ============================================================================

/// What to do when the gate fails or its results cannot be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishingStrategy {
    /// Log and carry on.
    #[default]
    BestEffort,
    /// Abort the job.
    Strict,
}

/// Rows the gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationScope {
    #[default]
    All,
    /// The first `n` rows in partition order.
    Sample(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityOptions {
    /// Metric namespace and report label.
    pub evaluation_context: String,
    pub enable_results_publishing: bool,
    pub strategy: PublishingStrategy,
    pub observation_scope: ObservationScope,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            evaluation_context: "DQContext".to_string(),
            enable_results_publishing: true,
            strategy: PublishingStrategy::BestEffort,
            observation_scope: ObservationScope::All,
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
}

impl Op {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "=" | "==" => Some(Self::Eq),
            _ => None,
        }
    }

    fn holds(self, actual: f64, expected: f64) -> bool {
        match self {
            Self::Gt => actual > expected,
            Self::Ge => actual >= expected,
            Self::Lt => actual < expected,
            Self::Le => actual <= expected,
            Self::Eq => (actual - expected).abs() < f64::EPSILON,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    ColumnCount(Op, f64),
    RowCount(Op, f64),
    IsComplete(String),
    ColumnExists(String),
    Completeness(String, Op, f64),
    /// A syntactically valid rule of a type this gate does not evaluate.
    Unsupported(String),
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnCount(op, n) => write!(f, "ColumnCount {} {n}", op.symbol()),
            Self::RowCount(op, n) => write!(f, "RowCount {} {n}", op.symbol()),
            Self::IsComplete(c) => write!(f, "IsComplete \"{c}\""),
            Self::ColumnExists(c) => write!(f, "ColumnExists \"{c}\""),
            Self::Completeness(c, op, x) => write!(f, "Completeness \"{c}\" {} {x}", op.symbol()),
            Self::Unsupported(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Number(f64),
    Op(Op),
    Comma,
    Open,
    Close,
    Assign,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ']' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, ch)) => s.push(ch),
                        None => return Err(format!("unterminated string at offset {i}")),
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            '<' | '>' | '=' => {
                let mut op = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if matches!(ch, '<' | '>' | '=') {
                        op.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let after_rules = tokens.last().is_some_and(
                    |t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case("rules")),
                );
                let tok = if op == "=" && after_rules {
                    Token::Assign
                } else {
                    let parsed = Op::parse(&op)
                        .ok_or_else(|| format!("unknown operator `{op}` at offset {i}"))?;
                    Token::Op(parsed)
                };
                tokens.push(tok);
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut s = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_digit() || matches!(ch, '-' | '.' | 'e' | 'E') {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = s
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{s}` at offset {i}"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(s));
            }
            other => return Err(format!("unexpected character `{other}` at offset {i}")),
        }
    }
    Ok(tokens)
}

/// Parse a `Rules = [ … ]` ruleset.
///
/// # Errors
/// Returns a message describing the first syntax error.
pub fn parse_ruleset(text: &str) -> Result<Vec<Rule>, String> {
    let tokens = tokenize(text)?;
    let mut it = tokens.into_iter();
    match (it.next(), it.next(), it.next()) {
        (Some(Token::Word(w)), Some(Token::Assign), Some(Token::Open))
            if w.eq_ignore_ascii_case("rules") => {}
        _ => return Err("ruleset must start with `Rules = [`".to_string()),
    }

    let mut rules = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut closed = false;
    for tok in it.by_ref() {
        match tok {
            Token::Comma => rules.push(parse_rule(std::mem::take(&mut current))?),
            Token::Close => {
                closed = true;
                break;
            }
            other => current.push(other),
        }
    }
    if !closed {
        return Err("ruleset is missing the closing `]`".to_string());
    }
    if it.next().is_some() {
        return Err("unexpected input after the closing `]`".to_string());
    }
    if !current.is_empty() {
        rules.push(parse_rule(current)?);
    }
    if rules.is_empty() {
        return Err("ruleset contains no rules".to_string());
    }
    Ok(rules)
}

fn parse_rule(tokens: Vec<Token>) -> Result<Rule, String> {
    let mut it = tokens.into_iter();
    let Some(Token::Word(kind)) = it.next() else {
        return Err("expected a rule type".to_string());
    };
    let args: Vec<Token> = it.collect();
    let rule = match (kind.as_str(), args.as_slice()) {
        ("ColumnCount", [Token::Op(op), Token::Number(n)]) => Rule::ColumnCount(*op, *n),
        ("RowCount", [Token::Op(op), Token::Number(n)]) => Rule::RowCount(*op, *n),
        ("IsComplete", [Token::Quoted(c)]) => Rule::IsComplete(c.clone()),
        ("ColumnExists", [Token::Quoted(c)]) => Rule::ColumnExists(c.clone()),
        ("Completeness", [Token::Quoted(c), Token::Op(op), Token::Number(x)]) => {
            Rule::Completeness(c.clone(), *op, *x)
        }
        ("ColumnCount" | "RowCount" | "IsComplete" | "ColumnExists" | "Completeness", _) => {
            return Err(format!("malformed arguments for {kind}"));
        }
        (other, _) => Rule::Unsupported(other.to_string()),
    };
    Ok(rule)
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub status: RuleStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observations {
    pub row_count: usize,
    pub observed_rows: usize,
    pub column_count: usize,
    /// Non-null fraction per top-level column over the observed rows.
    pub completeness: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub evaluation_context: String,
    pub ruleset: String,
    pub evaluated_at: DateTime<Utc>,
    /// Set when the ruleset itself could not be parsed.
    pub ruleset_error: Option<String>,
    pub rules: Vec<RuleResult>,
    pub observations: Observations,
    pub passed: bool,
}

impl QualityReport {
    /// Rules that did not pass, plus the ruleset error if any.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut out: Vec<String> = self.ruleset_error.iter().cloned().collect();
        out.extend(
            self.rules
                .iter()
                .filter(|r| r.status != RuleStatus::Passed)
                .map(|r| format!("{:?}: {} ({})", r.status, r.rule, r.message)),
        );
        out
    }

    /// Metric points: one per rule (1 passed, 0 otherwise) plus the observations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn metric_points(&self) -> Vec<MetricPoint> {
        let timestamp = self.evaluated_at.timestamp();
        let tags = |extra: &[(&str, String)]| {
            let mut tags = HashMap::from([(
                "context".to_string(),
                self.evaluation_context.clone(),
            )]);
            tags.extend(extra.iter().map(|(k, v)| ((*k).to_string(), v.clone())));
            tags
        };
        let point = |name: &str, value: f64, tags: HashMap<String, String>| MetricPoint {
            name: name.to_string(),
            value,
            timestamp,
            tags,
        };

        let mut points = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            points.push(point(
                "dq.rule",
                if rule.status == RuleStatus::Passed { 1.0 } else { 0.0 },
                tags(&[
                    ("rule_index", (i + 1).to_string()),
                    ("rule", rule.rule.clone()),
                    ("status", format!("{:?}", rule.status)),
                ]),
            ));
        }
        points.push(point("dq.row_count", self.observations.row_count as f64, tags(&[])));
        points.push(point(
            "dq.column_count",
            self.observations.column_count as f64,
            tags(&[]),
        ));
        for (column, fraction) in &self.observations.completeness {
            points.push(point(
                "dq.completeness",
                *fraction,
                tags(&[("column", column.clone())]),
            ));
        }
        points.push(point(
            "dq.passed",
            if self.passed { 1.0 } else { 0.0 },
            tags(&[]),
        ));
        points
    }
}

/// Where a JSON copy of each report is stored.
pub struct ResultsTarget<'a> {
    pub storage: &'a dyn ObjectIO,
    pub location: ObjectLocation,
}

/// Evaluation report plus anything that went wrong while publishing it.
#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub report: QualityReport,
    pub publish_error: Option<String>,
}

impl QualityOutcome {
    /// True if every rule passed and the results were published.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.report.passed && self.publish_error.is_none()
    }

    /// Human-readable list of problems, empty for a clean outcome.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut out = self.report.problems();
        if let Some(e) = &self.publish_error {
            out.push(format!("publishing failed: {e}"));
        }
        out
    }
}

// ============================================================================
// Gate
// ============================================================================

#[derive(Debug, Clone)]
pub struct QualityGate {
    ruleset: String,
    options: QualityOptions,
}

impl QualityGate {
    pub fn new(ruleset: impl Into<String>, options: QualityOptions) -> Self {
        Self {
            ruleset: ruleset.into(),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &QualityOptions {
        &self.options
    }

    /// Evaluate the ruleset against `dataset`.
    #[must_use]
    pub fn evaluate(&self, dataset: &Dataset) -> QualityReport {
        let observations = observe(dataset, self.options.observation_scope);
        let evaluated_at = Utc::now();
        let (rules, ruleset_error) = match parse_ruleset(&self.ruleset) {
            Ok(rules) => (
                rules
                    .iter()
                    .map(|rule| evaluate_rule(rule, dataset, &observations))
                    .collect::<Vec<_>>(),
                None,
            ),
            Err(e) => (Vec::new(), Some(format!("invalid ruleset: {e}"))),
        };
        let passed =
            ruleset_error.is_none() && rules.iter().all(|r| r.status == RuleStatus::Passed);
        QualityReport {
            evaluation_context: self.options.evaluation_context.clone(),
            ruleset: self.ruleset.clone(),
            evaluated_at,
            ruleset_error,
            rules,
            observations,
            passed,
        }
    }

    /// Evaluate, publish when enabled, and log the result.
    ///
    /// Publishing failures are captured in the outcome rather than returned.
    pub fn process(
        &self,
        dataset: &Dataset,
        metrics: &dyn MetricIO,
        results: Option<&ResultsTarget<'_>>,
    ) -> QualityOutcome {
        let report = self.evaluate(dataset);
        let publish_error = if self.options.enable_results_publishing {
            self.publish(&report, metrics, results).err().map(|e| e.to_string())
        } else {
            debug!(context = %self.options.evaluation_context, "results publishing disabled");
            None
        };
        let outcome = QualityOutcome {
            report,
            publish_error,
        };

        if outcome.is_clean() {
            info!(
                context = %self.options.evaluation_context,
                rules = outcome.report.rules.len(),
                "data quality rules passed"
            );
        } else {
            for problem in outcome.problems() {
                warn!(
                    context = %self.options.evaluation_context,
                    strategy = ?self.options.strategy,
                    "data quality: {problem}"
                );
            }
        }
        outcome
    }

    fn publish(
        &self,
        report: &QualityReport,
        metrics: &dyn MetricIO,
        results: Option<&ResultsTarget<'_>>,
    ) -> CloudResult<()> {
        metrics.put_metrics(&report.evaluation_context, report.metric_points())?;
        if let Some(target) = results {
            let key = target.location.key(&format!(
                "{}/{}.json",
                report.evaluation_context,
                report
                    .evaluated_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
                    .replace(':', "-")
            ));
            let body = serde_json::to_vec_pretty(report).map_err(|e| {
                crate::storage::CloudIOError::new(
                    crate::storage::ErrorKind::InvalidInput,
                    "serialize quality report",
                )
                .with_source(e.to_string())
            })?;
            target
                .storage
                .put_object(&target.location.bucket, &key, &body)?;
            debug!(key = %key, "wrote quality report");
        }
        Ok(())
    }
}

fn observe(dataset: &Dataset, scope: ObservationScope) -> Observations {
    let limit = match scope {
        ObservationScope::All => usize::MAX,
        ObservationScope::Sample(n) => n,
    };
    let observed: Vec<_> = dataset.records().take(limit).collect();
    let completeness = dataset
        .schema()
        .names()
        .map(|name| {
            let present = observed.iter().filter(|r| !r.get(name).is_null()).count();
            #[allow(clippy::cast_precision_loss)]
            let fraction = if observed.is_empty() {
                1.0
            } else {
                present as f64 / observed.len() as f64
            };
            (name.to_string(), fraction)
        })
        .collect();
    Observations {
        row_count: dataset.num_rows(),
        observed_rows: observed.len(),
        column_count: dataset.schema().len(),
        completeness,
    }
}

#[allow(clippy::cast_precision_loss)]
fn evaluate_rule(rule: &Rule, dataset: &Dataset, obs: &Observations) -> RuleResult {
    let result = |status: RuleStatus, message: String| RuleResult {
        rule: rule.to_string(),
        status,
        message,
    };
    let check = |ok: bool, message: String| {
        result(if ok { RuleStatus::Passed } else { RuleStatus::Failed }, message)
    };
    match rule {
        Rule::ColumnCount(op, n) => check(
            op.holds(obs.column_count as f64, *n),
            format!("column count is {}", obs.column_count),
        ),
        Rule::RowCount(op, n) => check(
            op.holds(obs.row_count as f64, *n),
            format!("row count is {}", obs.row_count),
        ),
        Rule::ColumnExists(c) => {
            let exists = dataset.schema().field(c).is_some();
            check(exists, format!("column {c} exists: {exists}"))
        }
        Rule::IsComplete(c) => match obs.completeness.get(c) {
            Some(f) => check(*f >= 1.0, format!("completeness of {c} is {f:.4}")),
            None => result(RuleStatus::Error, format!("column {c} does not exist")),
        },
        Rule::Completeness(c, op, x) => match obs.completeness.get(c) {
            Some(f) => check(op.holds(*f, *x), format!("completeness of {c} is {f:.4}")),
            None => result(RuleStatus::Error, format!("column {c} does not exist")),
        },
        Rule::Unsupported(kind) => result(
            RuleStatus::Error,
            format!("rule type {kind} is not supported"),
        ),
    }
}
