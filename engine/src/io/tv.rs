//! The time-varying three-step protocol against an operating-model directory.
//!
//! Each step consumes the previous one's state, so the intermediate solve cannot be
//! skipped and the final rewrite cannot run against a stale report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::document::Document;
use crate::core::error::SimError;
use crate::core::mutators::starter::set_use_par;
use crate::core::mutators::time_varying::{LinkSlot, TimeVarying, final_rewrite};
use crate::core::types::{ModelKind, SolveMode};
use crate::io::files::{read_document, rewrite, write_document};
use crate::io::layout::ModelFiles;
use crate::io::solver::{PAR_FILE, REPORT_FILE, SolveOutcome, SolveRequest, Solver, solve_recorded};

/// Step one done: control and data files linked, starter on the control file.
#[derive(Debug)]
pub struct TvRewritten {
    dir: PathBuf,
    files: ModelFiles,
    par_name: String,
    original_par: Document,
    links: Vec<LinkSlot>,
}

/// Step two done: the no-estimation run produced a fresh parameter file and report.
#[derive(Debug)]
pub struct TvSolved {
    rewritten: TvRewritten,
    solved_par: Document,
    report: Document,
    outcome: SolveOutcome,
}

/// Step one: link every target, keeping the original parameter values for step three.
#[instrument(skip(files, tv), fields(targets = tv.deviations.len()))]
pub fn rewrite_model(dir: &Path, files: &ModelFiles, tv: &TimeVarying) -> Result<TvRewritten> {
    let par_name = files
        .par
        .clone()
        .ok_or_else(|| SimError::contract("time-varying parameters need a parameter file"))?;
    let original_par = read_document(&dir.join(&par_name))?;
    let ctl = read_document(&dir.join(&files.ctl))?;
    let dat = read_document(&dir.join(&files.dat))?;

    let out = tv
        .initial_rewrite(&ctl, &dat)
        .with_context(|| format!("time-varying rewrite in {}", dir.display()))?;
    write_document(&dir.join(&files.ctl), &out.ctl)?;
    write_document(&dir.join(&files.dat), &out.dat)?;
    rewrite(&dir.join(&files.starter), |starter| set_use_par(starter, false))?;
    info!(links = out.links.len(), "time-varying links written");

    Ok(TvRewritten {
        dir: dir.to_path_buf(),
        files: files.clone(),
        par_name,
        original_par,
        links: out.links,
    })
}

impl TvRewritten {
    pub fn links(&self) -> &[LinkSlot] {
        &self.links
    }

    /// Step two: run the solver with estimation disabled. The outcome is appended to
    /// `solves` whether or not the run succeeded.
    pub fn solve<S: Solver + ?Sized>(
        self,
        solver: &S,
        scenario: &str,
        iteration: u32,
        solves: &mut Vec<SolveOutcome>,
    ) -> Result<TvSolved> {
        let request = SolveRequest {
            workdir: self.dir.clone(),
            scenario: scenario.to_string(),
            iteration,
            model: ModelKind::Om,
            mode: SolveMode::NoEstimation,
        };
        let outcome = solve_recorded(solver, &request, solves)
            .context("time-varying intermediate solve")?;
        let solved_par = read_document(&self.dir.join(PAR_FILE))?;
        let report = read_document(&self.dir.join(REPORT_FILE))?;
        Ok(TvSolved {
            rewritten: self,
            solved_par,
            report,
            outcome,
        })
    }
}

impl TvSolved {
    pub fn outcome(&self) -> &SolveOutcome {
        &self.outcome
    }

    /// Step three: write the final parameter file and point the starter back at it.
    pub fn finalize(self) -> Result<SolveOutcome> {
        let TvRewritten {
            dir,
            files,
            par_name,
            original_par,
            links,
        } = self.rewritten;
        let par = final_rewrite(&original_par, &self.solved_par, &self.report, &links)
            .context("time-varying final rewrite")?;
        write_document(&dir.join(&par_name), &par.with_name(&par_name))?;
        rewrite(&dir.join(&files.starter), |starter| set_use_par(starter, true))?;
        info!(dir = %dir.display(), "time-varying parameter file finalized");
        Ok(self.outcome)
    }
}
