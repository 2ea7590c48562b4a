//! Runs every (scenario, iteration) unit of a batch.
//!
//! Units are independent: each owns its iteration directory, so they run on a
//! fixed-size rayon pool without coordination. The batch continues past failed
//! units; the summary written at the end records them.

use anyhow::{Context, Result};
use engine::io::layout::{Claim, RerunPolicy};
use engine::io::solver::Solver;
use engine::io::unit_state::{UnitRecord, UnitState};
use rayon::prelude::*;
use tracing::{error, info, instrument};

use crate::config::Batch;
use crate::pipeline::{UnitContext, run_unit};
use crate::scenario::Scenario;
use crate::summary::{BatchSummary, summarize, write_summary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub policy: RerunPolicy,
    /// Concurrent units; overrides `batch.jobs` when set.
    pub jobs: Option<usize>,
}

struct Task<'a> {
    scenario: &'a Scenario,
    iteration: u32,
    seed: u64,
}

/// Units of `batch` that should run under `policy`, in scenario then iteration order.
fn claim_units(batch: &Batch, policy: RerunPolicy) -> Result<Vec<Task<'_>>> {
    let layout = batch.layout();
    let mut tasks = Vec::new();
    for scenario in &batch.scenarios {
        for iteration in batch.iterations() {
            match layout.claim(&scenario.id, iteration, policy)? {
                Claim::Run => tasks.push(Task {
                    scenario,
                    iteration,
                    seed: batch.seed(iteration),
                }),
                Claim::Skip(state) => {
                    info!(scenario = %scenario.id, iteration, ?state, "skipping unit");
                }
            }
        }
    }
    Ok(tasks)
}

/// Run all claimed units, then summarize the whole batch tree.
#[instrument(skip_all, fields(batch = %batch.file.batch.id))]
pub fn run_batch<S: Solver + ?Sized>(
    batch: &Batch,
    solver: &S,
    options: RunOptions,
) -> Result<BatchSummary> {
    let layout = batch.layout();
    let tasks = claim_units(batch, options.policy)?;
    let jobs = options.jobs.unwrap_or(batch.file.batch.jobs).max(1);
    info!(units = tasks.len(), jobs, "starting batch");

    let ctx = UnitContext {
        layout: &layout,
        base: &batch.base,
        solver,
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("build worker pool")?;
    let results: Vec<Result<UnitRecord>> = pool.install(|| {
        tasks
            .par_iter()
            .map(|task| run_unit(&ctx, task.scenario, task.iteration, task.seed))
            .collect()
    });

    let mut failed = 0;
    let mut errors = Vec::new();
    for (task, result) in tasks.iter().zip(results) {
        match result {
            Ok(record) if record.state == UnitState::Failed => failed += 1,
            Ok(_) => {}
            Err(err) => {
                error!(
                    scenario = %task.scenario.id,
                    iteration = task.iteration,
                    err = %format!("{err:#}"),
                    "unit aborted"
                );
                failed += 1;
                errors.push((task, err));
            }
        }
    }
    info!(ran = tasks.len(), failed, "batch finished");

    let mut summary = summarize(batch, &layout)?;
    for (task, err) in &errors {
        summary.record_unit_error(&task.scenario.id, task.iteration, err);
    }
    write_summary(layout.root(), &summary)?;
    Ok(summary)
}

/// Create the iteration directories of every claimed unit without solving anything.
pub fn prepare_batch(batch: &Batch, policy: RerunPolicy) -> Result<usize> {
    let layout = batch.layout();
    let iterations = batch.iterations();
    let mut prepared = 0;
    for scenario in &batch.scenarios {
        prepared += layout
            .prepare(&scenario.id, &iterations, &batch.base, policy)
            .with_context(|| format!("prepare scenario {}", scenario.id))?
            .len();
    }
    Ok(prepared)
}
