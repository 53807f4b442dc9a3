#![forbid(unsafe_code)]

use std::path::PathBuf;

use ph_conformance::{HarnessConfig, enforce_gate, run_suites_grouped, write_report};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut suite_filter: Option<String> = None;
    let mut fixture_root: Option<PathBuf> = None;
    let mut report_path: Option<PathBuf> = None;
    let mut require_green = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--suite" => {
                let value = args
                    .next()
                    .ok_or("--suite requires a value (e.g. arithmetic)")?;
                suite_filter = Some(value);
            }
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                fixture_root = Some(PathBuf::from(value));
            }
            "--write-report" => {
                let value = args.next().ok_or("--write-report requires a file path")?;
                report_path = Some(PathBuf::from(value));
            }
            "--require-green" => {
                require_green = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = HarnessConfig::default_paths();
    if let Some(root) = fixture_root {
        config = config.with_fixture_root(root);
    }

    let reports = run_suites_grouped(&config, suite_filter.as_deref())?;
    for report in &reports {
        println!(
            "suite={} fixtures={} passed={} failed={} green={}",
            report.suite,
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
        for result in report.results.iter().filter(|result| result.mismatch.is_some()) {
            println!(
                "  case={} mismatch={}",
                result.case_id,
                result.mismatch.as_deref().unwrap_or_default()
            );
        }
    }

    if let Some(path) = report_path {
        write_report(&path, &reports)?;
        println!("wrote report={}", path.display());
    }

    if require_green {
        enforce_gate(&config, &reports)?;
    }

    Ok(())
}

fn print_help() {
    println!(
        "ph-conformance-cli\n\
         Usage:\n\
         \tph-conformance-cli [--suite NAME] [--fixture-root DIR] [--write-report PATH] [--require-green]\n\
         Options:\n\
         \t--suite <name>         Run only fixtures whose suite matches\n\
         \t--fixture-root <dir>   Read cases/ and gate.yaml from another directory\n\
         \t--write-report <path>  Write the grouped suite reports as JSON\n\
         \t--require-green        Fail with non-zero exit when any case or the gate fails\n\
         \t-h, --help             Show this help"
    );
}
