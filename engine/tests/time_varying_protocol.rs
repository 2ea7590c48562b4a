//! The time-varying three-step protocol against a prepared operating-model directory,
//! driven by the scripted solver.

use std::collections::BTreeMap;

use engine::core::document::Document;
use engine::core::error::ErrorKind;
use engine::core::fields::find_labelled;
use engine::core::mutators::starter::use_par;
use engine::core::mutators::time_varying::{TimeVarying, model_years};
use engine::core::par::ParFile;
use engine::core::report::parameter_table;
use engine::core::types::{ModelKind, SolveMode};
use engine::io::files::read_document;
use engine::io::layout::{BatchLayout, ModelFiles, RerunPolicy};
use engine::io::solver::{PAR_FILE, REPORT_FILE, SolveRequest, solve_recorded};
use engine::io::tv::rewrite_model;
use engine::test_support::{DATA, PAR, ScriptedSolver, write_base_models};
use pretty_assertions::assert_eq;

fn deviations(names: &[&str]) -> TimeVarying {
    let (styr, endyr) = model_years(&Document::parse("om.dat", DATA)).expect("years");
    let years = (endyr - styr + 1) as usize;
    TimeVarying {
        deviations: names
            .iter()
            .map(|name| (name.to_string(), vec![0.2; years]))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn slots(doc: &Document) -> Vec<String> {
    ParFile::parse(doc)
        .expect("par")
        .slots()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Natural mortality gets an inserted link line; recruitment reuses `SR_envlink`.
/// After the protocol the parameter file holds the original values with `1` at both
/// link slots, and a regular operating-model run accepts it.
#[test]
fn protocol_links_parameters_and_keeps_original_values() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = write_base_models(&temp.path().join("base")).expect("base");
    let layout = BatchLayout::new(temp.path().join("runs"));
    layout
        .prepare("TV", &[1], &base, RerunPolicy::default())
        .expect("prepare");
    let dir = layout.model_dir("TV", 1, ModelKind::Om);
    let solver = ScriptedSolver::new();

    let rewritten = rewrite_model(
        &dir,
        &ModelFiles::om_default(),
        &deviations(&["NatM_p_1_Fem_GP_1", "SR_LN(R0)"]),
    )
    .expect("initial rewrite");
    assert_eq!(rewritten.links().len(), 2);
    let starter = read_document(&dir.join("starter.ss")).expect("starter");
    assert!(!use_par(&starter).expect("use_par"));

    let mut solves = Vec::new();
    let solved = rewritten
        .solve(&solver, "TV", 1, &mut solves)
        .expect("intermediate solve");
    assert!(solved.outcome().success());
    let outcome = solved.finalize().expect("final rewrite");
    assert_eq!(outcome.mode, SolveMode::NoEstimation);

    let starter = read_document(&dir.join("starter.ss")).expect("starter");
    assert!(use_par(&starter).expect("use_par"));

    let report = read_document(&dir.join(REPORT_FILE)).expect("report");
    let table = parameter_table(&report).expect("table");
    let num = |label: &str| {
        table
            .iter()
            .find(|row| row.label == label)
            .map(|row| row.num)
            .expect(label)
    };
    let final_slots = slots(&read_document(&dir.join(PAR_FILE)).expect("par"));
    let mut expected = slots(&Document::parse("ss3.par", PAR));
    expected.insert(num("NatM_p_1_Fem_GP_1_ENV_add") - 1, "1".to_string());
    expected[num("SR_envlink") - 1] = "1".to_string();
    assert_eq!(final_slots, expected);

    let ctl = read_document(&dir.join("om.ctl")).expect("ctl");
    assert_eq!(find_labelled(&ctl, "NatM_p_1_Fem_GP_1_ENV_add").len(), 1);

    let request = SolveRequest {
        workdir: dir.clone(),
        scenario: "TV".into(),
        iteration: 1,
        model: ModelKind::Om,
        mode: SolveMode::Standard,
    };
    solve_recorded(&solver, &request, &mut solves).expect("operating-model run");
    assert_eq!(solves.len(), 2);
    let modes: Vec<SolveMode> = solver.calls().iter().map(|call| call.mode).collect();
    assert_eq!(modes, vec![SolveMode::NoEstimation, SolveMode::Standard]);
}

#[test]
fn failed_intermediate_solve_stops_the_protocol() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = write_base_models(&temp.path().join("base")).expect("base");
    let layout = BatchLayout::new(temp.path().join("runs"));
    layout
        .prepare("TV", &[2], &base, RerunPolicy::default())
        .expect("prepare");
    let dir = layout.model_dir("TV", 2, ModelKind::Om);
    let solver = ScriptedSolver::new().failing("TV", 2, ModelKind::Om);

    let rewritten = rewrite_model(
        &dir,
        &ModelFiles::om_default(),
        &deviations(&["Survey"]),
    )
    .expect("initial rewrite");
    let mut solves = Vec::new();
    let err = rewritten
        .solve(&solver, "TV", 2, &mut solves)
        .expect_err("solver fails");
    assert_eq!(ErrorKind::of(&err), ErrorKind::SolverFailure);
    assert_eq!(solves.len(), 1);
    assert_eq!(solves[0].mode, SolveMode::NoEstimation);
    assert!(!solves[0].success());
    // The base parameter file is untouched when step three never runs.
    assert_eq!(
        read_document(&dir.join(PAR_FILE)).expect("par").render(),
        PAR
    );
}

#[test]
fn conflicting_request_leaves_directory_unchanged() {
    let temp = tempfile::tempdir().expect("tempdir");
    let base = write_base_models(&temp.path().join("base")).expect("base");
    let dir = base.om.dir.clone();
    let before = read_document(&dir.join("om.ctl")).expect("ctl").render();

    let err = rewrite_model(
        &dir,
        &ModelFiles::om_default(),
        &deviations(&["VonBert_K_Fem_GP_1"]),
    )
    .expect_err("already varying");
    assert_eq!(ErrorKind::of(&err), ErrorKind::Conflict);
    assert_eq!(read_document(&dir.join("om.ctl")).expect("ctl").render(), before);
}
