#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ph_expr::{ConstructionError, ErrorKind, Expr, Operand, Operation, Slot, evaluate_with_policy};
use ph_ops::{ArithmeticOp, BinaryOp, UnaryOp};
use ph_runtime::{EvalPolicy, PolicyError};
use ph_types::{CallError, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn with_fixture_root(mut self, fixture_root: impl Into<PathBuf>) -> Self {
        self.fixture_root = fixture_root.into();
        self
    }

    #[must_use]
    pub fn case_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("cases")
    }

    #[must_use]
    pub fn gate_path(&self) -> PathBuf {
        self.fixture_root.join("gate.yaml")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub gate_present: bool,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = list_fixture_files(&config.case_fixture_root())
        .map(|files| files.len())
        .unwrap_or_default();

    HarnessReport {
        suite: "smoke",
        fixture_count,
        gate_present: config.gate_path().exists(),
    }
}

/// Host functions a fixture can place in a pipeline by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFunction {
    Len,
    Str,
    Double,
    Fail,
}

impl HostFunction {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Str => "str",
            Self::Double => "double",
            Self::Fail => "fail",
        }
    }

    #[must_use]
    pub fn stage(self) -> Expr {
        Expr::apply(self.name(), move |value| self.call(value))
    }

    fn call(self, value: Value) -> Result<Value, CallError> {
        match self {
            Self::Len => {
                let len = match &value {
                    Value::Str(text) => text.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Map(entries) => entries.len(),
                    other => {
                        return Err(CallError::new(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            Self::Str => Ok(match value {
                Value::Str(text) => Value::Str(text),
                other => Value::Str(other.to_string()),
            }),
            Self::Double => {
                ph_ops::arithmetic(ArithmeticOp::Mul, &value, &Value::Int(2), &EvalPolicy::strict())
                    .map_err(|err| CallError::with_source("double failed", err))
            }
            Self::Fail => Err(CallError::new("host function failed")),
        }
    }
}

/// Serializable mirror of an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FixtureExpr {
    Slot {
        #[serde(default)]
        slot: u16,
    },
    Binary {
        operator: BinaryOp,
        left: FixtureOperand,
        right: FixtureOperand,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<FixtureExpr>,
    },
    #[serde(rename = "getitem")]
    GetItem {
        receiver: Box<FixtureExpr>,
        key: FixtureOperand,
    },
    #[serde(rename = "getattr")]
    GetAttr {
        receiver: Box<FixtureExpr>,
        name: String,
    },
    MethodCall {
        receiver: Box<FixtureExpr>,
        name: String,
        #[serde(default)]
        args: Vec<FixtureOperand>,
        #[serde(default)]
        kwargs: BTreeMap<String, FixtureOperand>,
    },
    Apply {
        function: HostFunction,
    },
    Pipe {
        first: Box<FixtureExpr>,
        then: Vec<FixtureExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureOperand {
    Literal { literal: Value },
    Expr(Box<FixtureExpr>),
}

impl FixtureExpr {
    pub fn build(&self) -> Result<Expr, ConstructionError> {
        match self {
            Self::Slot { slot } => Ok(Expr::slot(Slot::new(*slot))),
            Self::Binary {
                operator,
                left,
                right,
            } => Expr::binary(*operator, left.build()?, right.build()?),
            Self::Unary { operator, operand } => Ok(Expr::unary(*operator, operand.build()?)),
            Self::GetItem { receiver, key } => Expr::get_item(receiver.build()?, key.build()?),
            Self::GetAttr { receiver, name } => Ok(Expr::get_attr(receiver.build()?, name.clone())),
            Self::MethodCall {
                receiver,
                name,
                args,
                kwargs,
            } => {
                let args = args
                    .iter()
                    .map(FixtureOperand::build)
                    .collect::<Result<Vec<_>, _>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(key, arg)| arg.build().map(|operand| (key.clone(), operand)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                Expr::method_call(receiver.build()?, name.clone(), args, kwargs)
            }
            Self::Apply { function } => Ok(function.stage()),
            Self::Pipe { first, then } => Expr::pipeline(
                first.build()?,
                then.iter().map(FixtureExpr::build).collect::<Result<Vec<_>, _>>()?,
            ),
        }
    }
}

impl FixtureOperand {
    pub fn build(&self) -> Result<Operand, ConstructionError> {
        match self {
            Self::Literal { literal } => Ok(Operand::Literal(literal.clone())),
            Self::Expr(expr) => expr.build().map(Operand::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFixture {
    pub suite: String,
    pub case_id: String,
    pub expr: FixtureExpr,
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub policy: Option<EvalPolicy>,
    #[serde(default)]
    pub expected: Option<Value>,
    #[serde(default)]
    pub expected_error: Option<ErrorKind>,
    #[serde(default)]
    pub expected_render: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub suite: String,
    pub case_id: String,
    pub operation: Option<Operation>,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub pass: bool,
    pub fixture_count: usize,
    pub failed: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("gate failed: {0}")]
    GateFailed(String),
}

#[derive(Debug, Deserialize)]
struct GateConfig {
    suite: String,
    require_fixture_count_at_least: usize,
    require_failed: usize,
    #[serde(default)]
    required_suites: Vec<String>,
}

pub const ALL_CASES_SUITE: &str = "placeholder_cases";

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    run_suite_filtered(config, None)
}

pub fn run_suite_filtered(
    config: &HarnessConfig,
    suite_filter: Option<&str>,
) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config, suite_filter)?;
    let suite = match suite_filter {
        Some(suite) => format!("{ALL_CASES_SUITE}:{suite}"),
        None => ALL_CASES_SUITE.to_owned(),
    };
    build_report(suite, &fixtures)
}

pub fn run_suites_grouped(
    config: &HarnessConfig,
    suite_filter: Option<&str>,
) -> Result<Vec<SuiteReport>, HarnessError> {
    let fixtures = load_fixtures(config, suite_filter)?;
    let mut grouped = BTreeMap::<String, Vec<CaseFixture>>::new();
    for fixture in fixtures {
        grouped
            .entry(fixture.suite.clone())
            .or_default()
            .push(fixture);
    }

    let mut reports = Vec::with_capacity(grouped.len());
    for (suite, suite_fixtures) in grouped {
        reports.push(build_report(
            format!("{ALL_CASES_SUITE}:{suite}"),
            &suite_fixtures,
        )?);
    }
    Ok(reports)
}

/// Parse and run a single fixture document.
pub fn run_case_json(body: &str) -> Result<CaseResult, HarnessError> {
    let fixture: CaseFixture = serde_json::from_str(body)?;
    run_fixture(&fixture)
}

pub fn evaluate_gate(
    config: &HarnessConfig,
    reports: &[SuiteReport],
) -> Result<GateResult, HarnessError> {
    let gate: GateConfig = serde_yaml::from_str(&fs::read_to_string(config.gate_path())?)?;

    let fixture_count: usize = reports.iter().map(|report| report.fixture_count).sum();
    let failed: usize = reports.iter().map(|report| report.failed).sum();

    let mut reasons = Vec::new();
    if let Some(report) = reports
        .iter()
        .find(|report| !report.suite.starts_with(&gate.suite))
    {
        reasons.push(format!(
            "suite mismatch: gate={}, report={}",
            gate.suite, report.suite
        ));
    }
    if fixture_count < gate.require_fixture_count_at_least {
        reasons.push(format!(
            "fixture_count={fixture_count} below required {}",
            gate.require_fixture_count_at_least
        ));
    }
    if failed != gate.require_failed {
        reasons.push(format!(
            "failed={failed} but gate requires {}",
            gate.require_failed
        ));
    }
    for required in &gate.required_suites {
        let present = reports
            .iter()
            .any(|report| report.suite.rsplit(':').next() == Some(required.as_str()));
        if !present {
            reasons.push(format!("required suite {required} has no fixtures"));
        }
    }

    Ok(GateResult {
        pass: reasons.is_empty(),
        fixture_count,
        failed,
        reasons,
    })
}

pub fn enforce_gate(config: &HarnessConfig, reports: &[SuiteReport]) -> Result<(), HarnessError> {
    let mut failures = Vec::new();
    for report in reports {
        if !report.is_green() {
            failures.push(format!(
                "{}: report failed fixtures={}",
                report.suite, report.failed
            ));
        }
    }
    let gate = evaluate_gate(config, reports)?;
    if !gate.pass {
        failures.push(format!("gate reasons={}", gate.reasons.join("; ")));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::GateFailed(failures.join(" | ")))
    }
}

pub fn write_report(path: &Path, reports: &[SuiteReport]) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(reports)?)?;
    Ok(())
}

fn build_report(suite: String, fixtures: &[CaseFixture]) -> Result<SuiteReport, HarnessError> {
    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in fixtures {
        results.push(run_fixture(fixture)?);
    }

    let failed = results
        .iter()
        .filter(|result| matches!(result.status, CaseStatus::Fail))
        .count();
    let passed = results.len().saturating_sub(failed);

    Ok(SuiteReport {
        suite,
        fixture_count: results.len(),
        passed,
        failed,
        results,
    })
}

fn load_fixtures(
    config: &HarnessConfig,
    suite_filter: Option<&str>,
) -> Result<Vec<CaseFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.case_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if suite_filter.is_none_or(|suite| fixture.suite == suite) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<CaseFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|err| {
        HarnessError::FixtureFormat(format!("{}: {err}", path.display()))
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn run_fixture(fixture: &CaseFixture) -> Result<CaseResult, HarnessError> {
    if fixture.expected.is_some() == fixture.expected_error.is_some() {
        return Err(HarnessError::FixtureFormat(format!(
            "{}: exactly one of expected / expected_error is required",
            fixture.case_id
        )));
    }
    let policy = fixture.policy.clone().unwrap_or_default();
    policy.validate()?;

    let (operation, mismatch) = match fixture.expr.build() {
        Ok(expr) => (Some(expr.operation()), check_expr(fixture, &expr, &policy).err()),
        Err(err) => (None, check_error(fixture, err.kind(), &err.to_string()).err()),
    };

    Ok(CaseResult {
        suite: fixture.suite.clone(),
        case_id: fixture.case_id.clone(),
        operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
    })
}

fn check_expr(fixture: &CaseFixture, expr: &Expr, policy: &EvalPolicy) -> Result<(), String> {
    if let Some(render) = &fixture.expected_render {
        let actual = expr.to_string();
        if &actual != render {
            return Err(format!("render mismatch: expected {render:?}, got {actual:?}"));
        }
    }

    match evaluate_with_policy(expr, &fixture.inputs, policy) {
        Ok(actual) => match &fixture.expected {
            Some(expected) if expected.identical(&actual) => Ok(()),
            Some(expected) => Err(format!("value mismatch: expected {expected}, got {actual}")),
            None => Err(format!(
                "expected {:?} but evaluation returned {actual}",
                fixture.expected_error
            )),
        },
        Err(err) => check_error(fixture, err.kind(), &err.to_string()),
    }
}

fn check_error(fixture: &CaseFixture, kind: ErrorKind, message: &str) -> Result<(), String> {
    match fixture.expected_error {
        Some(expected) if expected == kind => Ok(()),
        Some(expected) => Err(format!(
            "error mismatch: expected {expected:?}, got {kind:?} ({message})"
        )),
        None => Err(format!("unexpected {kind:?} error: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ph_expr::{ErrorKind, Operation};
    use ph_types::Value;

    use super::{
        CaseStatus, FixtureExpr, HarnessConfig, HarnessError, HostFunction, run_case_json,
        run_smoke, run_suite, run_suites_grouped, write_report,
    };

    const ADD_ONE: &str = r#"{
        "suite": "arithmetic",
        "case_id": "add_one",
        "expr": {
            "op": "binary",
            "operator": "add",
            "left": {"op": "slot"},
            "right": {"literal": {"kind": "int", "value": 1}}
        },
        "inputs": [{"kind": "int", "value": 41}],
        "expected": {"kind": "int", "value": 42},
        "expected_render": "_0 + 1"
    }"#;

    #[test]
    fn fixture_expressions_parse_and_build() {
        let json = r#"{"op": "pipe", "first": {"op": "slot"}, "then": [{"op": "apply", "function": "len"}]}"#;
        let fixture: FixtureExpr = serde_json::from_str(json).expect("parse");
        let expr = fixture.build().expect("build");
        assert_eq!(expr.operation(), Operation::Pipe);
        assert_eq!(expr.to_string(), "_0 >> len(_0)");
        assert_eq!(expr.eval(&[Value::from("four")]).expect("eval"), Value::Int(4));
    }

    #[test]
    fn passing_case_reports_pass() {
        let result = run_case_json(ADD_ONE).expect("run");
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert_eq!(result.operation, Some(Operation::Add));
    }

    #[test]
    fn wrong_expectation_reports_mismatch() {
        let body = ADD_ONE.replace(r#""value": 42"#, r#""value": 43"#);
        let result = run_case_json(&body).expect("run");
        assert_eq!(result.status, CaseStatus::Fail);
        assert_eq!(
            result.mismatch.as_deref(),
            Some("value mismatch: expected 43, got 42")
        );
    }

    #[test]
    fn int_and_float_results_are_not_interchangeable() {
        let body = ADD_ONE.replace(
            r#""expected": {"kind": "int", "value": 42}"#,
            r#""expected": {"kind": "float", "value": 42.0}"#,
        );
        let result = run_case_json(&body).expect("run");
        assert_eq!(result.status, CaseStatus::Fail);
    }

    #[test]
    fn construction_errors_are_expected_outcomes() {
        let body = r#"{
            "suite": "construction",
            "case_id": "literal_only",
            "expr": {
                "op": "binary",
                "operator": "mul",
                "left": {"literal": {"kind": "int", "value": 2}},
                "right": {"literal": {"kind": "int", "value": 3}}
            },
            "expected_error": "no_placeholder"
        }"#;
        let result = run_case_json(body).expect("run");
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert_eq!(result.operation, None);
    }

    #[test]
    fn fixtures_need_exactly_one_expectation() {
        let body = ADD_ONE.replace(
            r#""expected_render""#,
            r#""expected_error": "overflow", "expected_render""#,
        );
        let err = run_case_json(&body).expect_err("two expectations");
        assert!(matches!(err, HarnessError::FixtureFormat(_)));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        let body = ADD_ONE.replace(r#""inputs""#, r#""policy": {"max_depth": 0}, "inputs""#);
        let err = run_case_json(&body).expect_err("zero depth");
        assert!(matches!(err, HarnessError::Policy(_)));
    }

    #[test]
    fn host_functions_behave() {
        let double = HostFunction::Double.stage();
        assert_eq!(double.eval(&[Value::from("ab")]).expect("eval"), Value::from("abab"));
        let err = HostFunction::Fail.stage().eval(&[Value::None]).expect_err("fail");
        assert_eq!(err.kind(), ErrorKind::CallFailed);
        assert_eq!(
            HostFunction::Str.stage().eval(&[Value::Float(1.5)]).expect("eval"),
            Value::from("1.5")
        );
    }

    #[test]
    fn suites_load_from_an_arbitrary_fixture_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases/arithmetic");
        fs::create_dir_all(&cases).expect("mkdir");
        fs::write(cases.join("add_one.json"), ADD_ONE).expect("write fixture");
        fs::write(cases.join("notes.txt"), "ignored").expect("write note");

        let config = HarnessConfig::default_paths().with_fixture_root(dir.path());
        let smoke = run_smoke(&config);
        assert_eq!(smoke.fixture_count, 1);
        assert!(!smoke.gate_present);

        let report = run_suite(&config).expect("suite");
        assert!(report.is_green());
        assert_eq!(report.passed, 1);

        let grouped = run_suites_grouped(&config, Some("arithmetic")).expect("grouped");
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].suite, "placeholder_cases:arithmetic");

        let out = dir.path().join("out/report.json");
        write_report(&out, &grouped).expect("write report");
        let body = fs::read_to_string(out).expect("read report");
        assert!(body.contains("\"add_one\""));
    }

    #[test]
    fn malformed_fixture_files_name_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases");
        fs::create_dir_all(&cases).expect("mkdir");
        fs::write(cases.join("broken.json"), "{ not json").expect("write");

        let config = HarnessConfig::default_paths().with_fixture_root(dir.path());
        let err = run_suite(&config).expect_err("broken fixture");
        let HarnessError::FixtureFormat(message) = err else {
            panic!("expected FixtureFormat, got {err:?}");
        };
        assert!(message.contains("broken.json"), "{message}");
    }
}
