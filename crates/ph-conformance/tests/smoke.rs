use std::path::Path;

use ph_conformance::{
    HarnessConfig, enforce_gate, evaluate_gate, run_smoke, run_suite, run_suites_grouped,
};

#[test]
fn smoke_report_is_stable() {
    let cfg = HarnessConfig::default_paths();
    let report = run_smoke(&cfg);
    assert_eq!(report.suite, "smoke");
    assert!(report.fixture_count >= 1);
    assert!(report.gate_present);

    let fixture_path = cfg.case_fixture_root().join("arithmetic/add_literal.json");
    assert!(Path::new(&fixture_path).exists());
}

#[test]
fn case_suite_is_green() {
    let cfg = HarnessConfig::default_paths();
    let report = run_suite(&cfg).expect("case suite should run");
    let failures: Vec<_> = report
        .results
        .iter()
        .filter_map(|result| {
            result
                .mismatch
                .as_ref()
                .map(|mismatch| format!("{}: {mismatch}", result.case_id))
        })
        .collect();
    assert!(failures.is_empty(), "{failures:#?}");
    assert!(report.is_green());
}

#[test]
fn grouped_suites_pass_the_gate() {
    let cfg = HarnessConfig::default_paths();
    let reports = run_suites_grouped(&cfg, None).expect("grouped suites");
    assert!(reports.len() >= 5);

    let gate = evaluate_gate(&cfg, &reports).expect("gate");
    assert!(gate.pass, "{:?}", gate.reasons);
    enforce_gate(&cfg, &reports).expect("gate enforced");
}

#[test]
fn filtered_gate_run_reports_missing_suites() {
    let cfg = HarnessConfig::default_paths();
    let reports = run_suites_grouped(&cfg, Some("pipeline")).expect("pipeline suite");
    assert_eq!(reports.len(), 1);

    let gate = evaluate_gate(&cfg, &reports).expect("gate");
    assert!(!gate.pass);
    assert!(
        gate.reasons
            .iter()
            .any(|reason| reason.contains("required suite arithmetic"))
    );
}
