//! The solver adapter against a real child process: a shell script standing in for
//! the solver binary.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine::core::types::{ModelKind, SolveMode};
use engine::io::solver::{
    NO_EST, NO_HESS, SOLVER_LOG, SolveRequest, SolveStatus, Solver, SolverContext,
    SolverOptions, Ss3Solver,
};

/// Write an executable script named `ss_test` whose artifacts use that stem.
fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ss_test");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

const WRITES_ARTIFACTS: &str = r#"echo "args: $*"
echo "tag: $SIM_TAG" >&2
printf '# Number of parameters = 1\n# p[1]:\n0.5\n' > ss_test.par
printf 'PARAMETERS\nNum Label Value\n1 A 0.5\n' > Report.sso"#;

fn options(timeout: Duration) -> SolverOptions {
    SolverOptions {
        extra_args: "-nox".to_string(),
        timeout,
        settle: Duration::ZERO,
        env: BTreeMap::from([("SIM_TAG".to_string(), "batch-7".to_string())]),
        ..SolverOptions::default()
    }
}

fn request(workdir: &Path, model: ModelKind) -> SolveRequest {
    SolveRequest {
        workdir: workdir.to_path_buf(),
        scenario: "F0".into(),
        iteration: 1,
        model,
        mode: SolveMode::Standard,
    }
}

#[test]
fn successful_run_renames_artifacts_and_logs_output() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    let exe = script(bin.path(), WRITES_ARTIFACTS);
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Om))
        .expect("solve");
    assert_eq!(outcome.status, SolveStatus::Ok);
    assert!(work.path().join("ss3.par").is_file());
    assert!(!work.path().join("ss_test.par").exists());
    assert!(outcome.artifacts.contains(&work.path().join("Report.sso")));

    let log = fs::read_to_string(work.path().join(SOLVER_LOG)).expect("log");
    assert!(log.contains(&format!("args: -nox {NO_HESS} {NO_EST}")), "{log}");
    assert!(log.contains("tag: batch-7"), "{log}");
    assert!(log.contains("[solver exit code 0]"), "{log}");
}

#[test]
fn estimation_run_keeps_estimation_enabled() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    let exe = script(bin.path(), WRITES_ARTIFACTS);
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    solver
        .solve(&request(work.path(), ModelKind::Em))
        .expect("solve");
    let log = fs::read_to_string(work.path().join(SOLVER_LOG)).expect("log");
    assert!(log.contains(&format!("args: -nox {NO_HESS}\n")), "{log}");
}

#[test]
fn clean_exit_without_artifacts_is_reported() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    let exe = script(bin.path(), "echo nothing to see");
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Om))
        .expect("solve");
    assert_eq!(
        outcome.status,
        SolveStatus::MissingArtifacts {
            missing: vec!["Report.sso".to_string(), "ss3.par".to_string()]
        }
    );
    assert!(outcome.check().is_err());
}

#[test]
fn outputs_left_by_an_earlier_run_do_not_count() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    fs::write(work.path().join("ss3.par"), "# earlier estimates\n0.25\n").expect("par");
    fs::write(work.path().join("Report.sso"), "PARAMETERS\n").expect("report");
    let exe = script(bin.path(), "exit 0");
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Om))
        .expect("solve");
    assert_eq!(
        outcome.status,
        SolveStatus::MissingArtifacts {
            missing: vec!["Report.sso".to_string(), "ss3.par".to_string()]
        }
    );
    assert!(!work.path().join("Report.sso").exists());
    // The parameter file is a solver input and is never removed.
    assert_eq!(
        fs::read_to_string(work.path().join("ss3.par")).expect("par"),
        "# earlier estimates\n0.25\n"
    );
}

#[test]
fn rewritten_parameter_file_counts_as_produced() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    fs::write(work.path().join("ss3.par"), "# earlier estimates\n0.25\n").expect("par");
    let exe = script(bin.path(), WRITES_ARTIFACTS);
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Om))
        .expect("solve");
    assert_eq!(outcome.status, SolveStatus::Ok);
    let par = fs::read_to_string(work.path().join("ss3.par")).expect("par");
    assert!(par.contains("0.5"), "{par}");
}

#[test]
fn nonzero_exit_is_reported() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    let exe = script(bin.path(), "echo bad input >&2\nexit 4");
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_secs(10)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Em))
        .expect("solve");
    assert_eq!(outcome.status, SolveStatus::Exited { code: Some(4) });
}

#[test]
fn slow_solver_times_out() {
    let bin = tempfile::tempdir().expect("bin");
    let work = tempfile::tempdir().expect("work");
    let exe = script(bin.path(), "exec sleep 5");
    let solver = Ss3Solver::new(
        SolverContext::new(exe),
        options(Duration::from_millis(200)),
    );

    let outcome = solver
        .solve(&request(work.path(), ModelKind::Om))
        .expect("solve");
    assert!(matches!(outcome.status, SolveStatus::TimedOut { .. }));
    let log = fs::read_to_string(work.path().join(SOLVER_LOG)).expect("log");
    assert!(log.contains("killed after timeout"), "{log}");
}

#[test]
fn explicit_path_resolves() {
    let bin = tempfile::tempdir().expect("bin");
    let exe = script(bin.path(), "exit 0");
    let context = SolverContext::resolve(Some(&exe)).expect("resolve");
    assert_eq!(context.executable(), exe.as_path());
    assert_eq!(context.stem(), "ss_test");
}
