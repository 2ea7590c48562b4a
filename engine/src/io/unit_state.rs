//! Per-iteration progress records (`<root>/<scenario>/<iteration>/status.json`).

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::ErrorKind;
use crate::io::files::write_atomic;
use crate::io::solver::SolveOutcome;

/// Position of a unit in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    OmPrepared,
    OmMutated,
    OmSolved,
    Sampled,
    EmPrepared,
    EmMutated,
    EmSolved,
    Complete,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Complete | UnitState::Failed)
    }
}

/// One transition of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PrepareOm,
    MutateOm,
    SolveOm,
    Sample,
    PrepareEm,
    MutateEm,
    SolveEm,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::PrepareOm,
        Step::MutateOm,
        Step::SolveOm,
        Step::Sample,
        Step::PrepareEm,
        Step::MutateEm,
        Step::SolveEm,
    ];

    /// State reached when the step succeeds.
    pub fn reaches(self) -> UnitState {
        match self {
            Step::PrepareOm => UnitState::OmPrepared,
            Step::MutateOm => UnitState::OmMutated,
            Step::SolveOm => UnitState::OmSolved,
            Step::Sample => UnitState::Sampled,
            Step::PrepareEm => UnitState::EmPrepared,
            Step::MutateEm => UnitState::EmMutated,
            Step::SolveEm => UnitState::EmSolved,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::PrepareOm => "prepare_om",
            Step::MutateOm => "mutate_om",
            Step::SolveOm => "solve_om",
            Step::Sample => "sample",
            Step::PrepareEm => "prepare_em",
            Step::MutateEm => "mutate_em",
            Step::SolveEm => "solve_em",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a unit stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub step: Step,
    pub kind: ErrorKind,
    /// Full error chain.
    pub message: String,
}

/// Persisted bookkeeping for one (scenario, iteration) unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub scenario: String,
    pub iteration: u32,
    pub seed: u64,
    pub state: UnitState,
    pub failure: Option<Failure>,
    pub started_at: String,
    pub updated_at: String,
    /// Every solver run of the unit, in order.
    #[serde(default)]
    pub solves: Vec<SolveOutcome>,
}

impl UnitRecord {
    pub fn new(scenario: &str, iteration: u32, seed: u64) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            scenario: scenario.to_string(),
            iteration,
            seed,
            state: UnitState::Pending,
            failure: None,
            started_at: now.clone(),
            updated_at: now,
            solves: Vec::new(),
        }
    }

    pub fn advance(&mut self, step: Step) {
        self.state = step.reaches();
        self.touch();
    }

    pub fn complete(&mut self) {
        self.state = UnitState::Complete;
        self.touch();
    }

    pub fn fail(&mut self, step: Step, err: &anyhow::Error) {
        self.state = UnitState::Failed;
        self.failure = Some(Failure {
            step,
            kind: ErrorKind::of(err),
            message: format!("{err:#}"),
        });
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}

pub fn load_record(path: &Path) -> Result<UnitRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read unit record {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse unit record {}", path.display()))
}

/// Load a record, treating a missing file as "never started".
pub fn load_record_if_exists(path: &Path) -> Result<Option<UnitRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    load_record(path).map(Some)
}

/// Atomically write a unit record (temp file + rename).
pub fn write_record(path: &Path, record: &UnitRecord) -> Result<()> {
    debug!(
        path = %path.display(),
        scenario = %record.scenario,
        iteration = record.iteration,
        state = ?record.state,
        "writing unit record"
    );
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    write_atomic(path, &buf)
}
