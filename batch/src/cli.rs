//! CLI command implementations. Each returns the process exit code.

use std::path::Path;

use anyhow::{Context, Result, bail};
use engine::exit_codes;
use engine::io::layout::RerunPolicy;
use engine::io::solver::{Ss3Solver, SolverContext};
use tracing::{debug, info};

use crate::collect::{collect, default_output};
use crate::config::load_batch;
use crate::orchestrate::{RunOptions, prepare_batch, run_batch};
use crate::summary::summarize;

/// Run every claimed unit of a batch.
pub fn run(batch_path: &Path, options: RunOptions) -> Result<i32> {
    let batch = load_batch(batch_path).context("load batch")?;
    let context = SolverContext::resolve(batch.file.solver.bin.as_deref())?;
    debug!(solver = %context.executable().display(), "solver resolved");
    let solver = Ss3Solver::new(context, batch.file.solver.to_options());

    info!(batch = %batch.file.batch.id, scenarios = batch.scenarios.len(), "running batch");
    let summary = run_batch(&batch, &solver, options)?;
    summary.print();
    println!(
        "run: batch={} root={}",
        batch.file.batch.id,
        batch.file.batch.root.display()
    );
    Ok(if summary.failed_units() > 0 {
        exit_codes::UNIT_FAILURES
    } else {
        exit_codes::OK
    })
}

/// Create iteration directories without running the solver.
pub fn prepare(batch_path: &Path, policy: RerunPolicy) -> Result<i32> {
    let batch = load_batch(batch_path).context("load batch")?;
    let prepared = prepare_batch(&batch, policy)?;
    println!(
        "prepare: batch={} iterations={} root={}",
        batch.file.batch.id,
        prepared,
        batch.file.batch.root.display()
    );
    Ok(exit_codes::OK)
}

/// Print progress of a batch from its output tree.
pub fn status(batch_path: &Path) -> Result<i32> {
    let batch = load_batch(batch_path).context("load batch")?;
    let summary = summarize(&batch, &batch.layout())?;
    summary.print();
    Ok(if summary.failed_units() > 0 {
        exit_codes::UNIT_FAILURES
    } else {
        exit_codes::OK
    })
}

/// Export parameter estimates of completed units.
pub fn collect_results(batch_path: &Path, out: Option<&Path>) -> Result<i32> {
    let batch = load_batch(batch_path).context("load batch")?;
    let out = out.map_or_else(|| default_output(&batch), Path::to_path_buf);
    let stats = collect(&batch, &out)?;
    println!(
        "collect: units={} rows={} out={}",
        stats.units,
        stats.rows,
        out.display()
    );
    Ok(exit_codes::OK)
}

/// Remove one scenario tree, or every scenario of the batch.
pub fn clean(batch_path: &Path, scenario: Option<&str>) -> Result<i32> {
    let batch = load_batch(batch_path).context("load batch")?;
    let layout = batch.layout();
    let targets: Vec<&str> = match scenario {
        Some(id) => {
            if batch.scenario(id).is_none() {
                bail!("scenario {id} is not part of batch {}", batch.file.batch.id);
            }
            vec![id]
        }
        None => batch.scenarios.iter().map(|s| s.id.as_str()).collect(),
    };
    for id in targets {
        if layout.clean_scenario(id)? {
            println!("clean: removed {}", layout.scenario_dir(id).display());
        }
    }
    Ok(exit_codes::OK)
}
