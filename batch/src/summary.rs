//! Batch summary: per scenario, which iterations completed, failed (and where) or
//! are still pending. Built by re-scanning unit records, so it also covers units
//! completed by earlier invocations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use engine::core::error::ErrorKind;
use engine::io::layout::BatchLayout;
use engine::io::unit_state::{Step, UnitState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::Batch;

pub const SUMMARY_FILE: &str = "batch_summary.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    /// SHA-256 of the batch file the summary was produced from.
    pub batch_hash: String,
    pub generated_at: String,
    pub scenarios: Vec<ScenarioSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub iterations: u32,
    pub completed: Vec<u32>,
    pub failed: Vec<FailedUnit>,
    /// Never started or interrupted.
    pub pending: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub iteration: u32,
    /// `None` when the unit failed outside its steps, e.g. writing its record.
    pub step: Option<Step>,
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchSummary {
    pub fn failed_units(&self) -> usize {
        self.scenarios.iter().map(|s| s.failed.len()).sum()
    }

    pub fn completed_units(&self) -> usize {
        self.scenarios.iter().map(|s| s.completed.len()).sum()
    }

    pub fn pending_units(&self) -> usize {
        self.scenarios.iter().map(|s| s.pending.len()).sum()
    }

    /// Count a unit whose run returned an error as failed, whatever its record says.
    pub fn record_unit_error(&mut self, scenario: &str, iteration: u32, err: &anyhow::Error) {
        let Some(summary) = self.scenarios.iter_mut().find(|s| s.scenario == scenario) else {
            return;
        };
        summary.completed.retain(|&i| i != iteration);
        summary.pending.retain(|&i| i != iteration);
        summary.failed.retain(|unit| unit.iteration != iteration);
        summary.failed.push(FailedUnit {
            iteration,
            step: None,
            kind: ErrorKind::of(err),
            message: format!("{err:#}"),
        });
        summary.failed.sort_by_key(|unit| unit.iteration);
    }

    /// Print the summary as `summary:` lines.
    pub fn print(&self) {
        println!(
            "summary: batch={} scenarios={} complete={} failed={} pending={}",
            self.batch_id,
            self.scenarios.len(),
            self.completed_units(),
            self.failed_units(),
            self.pending_units()
        );
        for scenario in &self.scenarios {
            println!(
                "summary: scenario={} complete={}/{} pending={}",
                scenario.scenario,
                scenario.completed.len(),
                scenario.iterations,
                scenario.pending.len()
            );
            for failed in &scenario.failed {
                let step = failed
                    .step
                    .map_or_else(|| "-".to_string(), |step| step.to_string());
                println!(
                    "summary: scenario={} iteration={} failed step={} kind={:?}: {}",
                    scenario.scenario, failed.iteration, step, failed.kind, failed.message
                );
            }
        }
    }
}

/// Scan the batch tree and summarize every scenario of `batch`.
pub fn summarize(batch: &Batch, layout: &BatchLayout) -> Result<BatchSummary> {
    let iterations = batch.iterations();
    let mut scenarios = Vec::with_capacity(batch.scenarios.len());
    for scenario in &batch.scenarios {
        let mut summary = ScenarioSummary {
            scenario: scenario.id.clone(),
            iterations: batch.file.batch.iterations,
            completed: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
        };
        for &iteration in &iterations {
            match layout.load_record(&scenario.id, iteration)? {
                Some(record) if record.state == UnitState::Complete => {
                    summary.completed.push(iteration);
                }
                Some(record) if record.state == UnitState::Failed => {
                    let (step, kind, message) = match record.failure {
                        Some(failure) => (Some(failure.step), failure.kind, failure.message),
                        None => (None, ErrorKind::Io, "no failure recorded".into()),
                    };
                    summary.failed.push(FailedUnit {
                        iteration,
                        step,
                        kind,
                        message,
                    });
                }
                _ => summary.pending.push(iteration),
            }
        }
        scenarios.push(summary);
    }
    Ok(BatchSummary {
        batch_id: batch.file.batch.id.clone(),
        batch_hash: file_sha256(&batch.source)?,
        generated_at: Utc::now().to_rfc3339(),
        scenarios,
    })
}

pub fn write_summary(root: &Path, summary: &BatchSummary) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    let path = root.join(SUMMARY_FILE);
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, format!("{contents}\n"))
        .with_context(|| format!("write summary {}", path.display()))?;
    debug!(path = %path.display(), "batch summary written");
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::core::error::SimError;
    use engine::io::unit_state::{UnitRecord, write_record};
    use engine::test_support::write_base_models;

    use crate::config::load_batch;

    const BATCH: &str = r#"
[batch]
id = "summary-test"
root = "runs"
iterations = 3

[model.om]
dir = "base/om"

[model.em]
dir = "base/em"

[[scenarios]]
label = "base"
"#;

    #[test]
    fn groups_units_by_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_base_models(&temp.path().join("base")).expect("base");
        let path = temp.path().join("batch.toml");
        fs::write(&path, BATCH).expect("batch");
        let batch = load_batch(&path).expect("load");
        let layout = batch.layout();

        let mut done = UnitRecord::new("base", 1, 1);
        done.complete();
        write_record(&layout.status_path("base", 1), &done).expect("record");
        let mut failed = UnitRecord::new("base", 3, 3);
        failed.fail(
            Step::SolveOm,
            &anyhow::Error::new(SimError::SolverTimeout { secs: 60 }),
        );
        write_record(&layout.status_path("base", 3), &failed).expect("record");

        let summary = summarize(&batch, &layout).expect("summary");
        let scenario = &summary.scenarios[0];
        assert_eq!(scenario.completed, vec![1]);
        assert_eq!(scenario.pending, vec![2]);
        assert_eq!(scenario.failed.len(), 1);
        assert_eq!(scenario.failed[0].step, Some(Step::SolveOm));
        assert_eq!(scenario.failed[0].kind, ErrorKind::SolverTimeout);
        assert_eq!(summary.failed_units(), 1);
        assert_eq!(summary.batch_hash.len(), 64);

        write_summary(layout.root(), &summary).expect("write");
        let written: BatchSummary = serde_json::from_str(
            &fs::read_to_string(layout.root().join(SUMMARY_FILE)).expect("read"),
        )
        .expect("parse");
        assert_eq!(written, summary);
    }

    #[test]
    fn unit_errors_override_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_base_models(&temp.path().join("base")).expect("base");
        let path = temp.path().join("batch.toml");
        fs::write(&path, BATCH).expect("batch");
        let batch = load_batch(&path).expect("load");

        let mut summary = summarize(&batch, &batch.layout()).expect("summary");
        let err = anyhow::Error::new(SimError::SolverFailure("lost".into()))
            .context("persist unit record for base/2");
        summary.record_unit_error("base", 2, &err);
        summary.record_unit_error("other", 1, &err);

        let scenario = &summary.scenarios[0];
        assert_eq!(scenario.pending, vec![1, 3]);
        assert_eq!(scenario.failed.len(), 1);
        assert_eq!(scenario.failed[0].iteration, 2);
        assert_eq!(scenario.failed[0].step, None);
        assert_eq!(scenario.failed[0].kind, ErrorKind::SolverFailure);
        assert!(scenario.failed[0].message.starts_with("persist unit record"));
    }
}
