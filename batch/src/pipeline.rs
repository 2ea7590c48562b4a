//! One unit of work: a (scenario, iteration) pair driven through the step sequence
//! `prepare_om → mutate_om → solve_om → sample → prepare_em → mutate_em → solve_em`.
//!
//! The unit record is written after every transition, so a killed batch leaves an
//! accurate `status.json` behind. A failing step marks the unit failed and stops it;
//! that is a result, not an error. Only failing to persist the record is an error.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use engine::core::mutators::starter::model_file_names;
use engine::core::types::{ModelKind, SolveMode};
use engine::io::files::{read_document, rewrite, write_document};
use engine::io::layout::{BaseModels, BatchLayout, ModelFiles};
use engine::io::solver::{REPORT_FILE, SolveRequest, Solver, solve_recorded};
use engine::io::tv::rewrite_model;
use engine::io::unit_state::{Step, UnitRecord, write_record};
use tracing::{debug, info, instrument, warn};

use crate::sampler::{sample_index, unit_rng};
use crate::scenario::Scenario;

/// Data file written by the sampling step, copied into the estimation model.
pub const SAMPLED_DATA: &str = "sampled.dat";

/// Everything a unit needs besides its identity.
pub struct UnitContext<'a, S: Solver + ?Sized> {
    pub layout: &'a BatchLayout,
    pub base: &'a BaseModels,
    pub solver: &'a S,
}

struct Unit<'a, S: Solver + ?Sized> {
    ctx: &'a UnitContext<'a, S>,
    scenario: &'a Scenario,
    iteration: u32,
    record: UnitRecord,
    status_path: PathBuf,
}

/// Run a unit from scratch and return its final record.
#[instrument(skip(ctx, scenario), fields(scenario = %scenario.id))]
pub fn run_unit<S: Solver + ?Sized>(
    ctx: &UnitContext<'_, S>,
    scenario: &Scenario,
    iteration: u32,
    seed: u64,
) -> Result<UnitRecord> {
    let mut unit = Unit {
        ctx,
        scenario,
        iteration,
        record: UnitRecord::new(&scenario.id, iteration, seed),
        status_path: ctx.layout.status_path(&scenario.id, iteration),
    };
    info!("unit started");

    for step in Step::ALL {
        if let Err(err) = unit.run_step(step) {
            warn!(%step, err = %format!("{err:#}"), "unit failed");
            unit.record.fail(step, &err);
            unit.persist()?;
            return Ok(unit.record);
        }
        unit.record.advance(step);
        unit.persist()?;
    }
    unit.record.complete();
    unit.persist()?;
    info!("unit complete");
    Ok(unit.record)
}

impl<S: Solver + ?Sized> Unit<'_, S> {
    fn persist(&self) -> Result<()> {
        write_record(&self.status_path, &self.record).with_context(|| {
            format!(
                "persist unit record for {}/{}",
                self.scenario.id, self.iteration
            )
        })
    }

    fn dir(&self, kind: ModelKind) -> PathBuf {
        self.ctx
            .layout
            .model_dir(&self.scenario.id, self.iteration, kind)
    }

    fn run_step(&mut self, step: Step) -> Result<()> {
        debug!(%step, "running step");
        match step {
            Step::PrepareOm => self.prepare_om(),
            Step::MutateOm => self.mutate_om(),
            Step::SolveOm => self.solve(ModelKind::Om),
            Step::Sample => self.sample(),
            Step::PrepareEm => self.prepare_em(),
            Step::MutateEm => self.mutate_em(),
            Step::SolveEm => self.solve(ModelKind::Em),
        }
    }

    fn prepare_om(&mut self) -> Result<()> {
        let layout = self.ctx.layout;
        layout.reset_iteration(&self.scenario.id, self.iteration)?;
        // The wipe removed the record; put it back before copying anything.
        self.persist()?;
        layout.copy_model(
            &self.scenario.id,
            self.iteration,
            ModelKind::Om,
            &self.ctx.base.om,
        )?;
        Ok(())
    }

    fn mutate_om(&mut self) -> Result<()> {
        if !self.scenario.touches(ModelKind::Om) {
            return Ok(());
        }
        let dir = self.dir(ModelKind::Om);
        let files = &self.ctx.base.om.files;
        if let Some(fishing) = &self.scenario.fishing {
            rewrite(&dir.join(&files.ctl), |ctl| fishing.apply(ctl)).context("fishing")?;
        }
        if let Some(tv) = &self.scenario.time_varying {
            rewrite_model(&dir, files, tv)?
                .solve(
                    self.ctx.solver,
                    &self.scenario.id,
                    self.iteration,
                    &mut self.record.solves,
                )?
                .finalize()?;
        }
        Ok(())
    }

    fn solve(&mut self, model: ModelKind) -> Result<()> {
        let request = SolveRequest {
            workdir: self.dir(model),
            scenario: self.scenario.id.clone(),
            iteration: self.iteration,
            model,
            mode: SolveMode::Standard,
        };
        solve_recorded(self.ctx.solver, &request, &mut self.record.solves)?;
        Ok(())
    }

    /// Draw observations from the solved operating model into a copy of its data file.
    fn sample(&mut self) -> Result<()> {
        let dir = self.dir(ModelKind::Om);
        let dat_name = om_data_name(&dir, &self.ctx.base.om.files)?;
        let dat = read_document(&dir.join(&dat_name))?;
        let sampled = match &self.scenario.index {
            Some(design) => {
                let report = read_document(&dir.join(REPORT_FILE))?;
                let mut rng = unit_rng(self.record.seed);
                sample_index(design, &report, &dat, &mut rng).context("index sampling")?
            }
            None => dat,
        };
        write_document(&dir.join(SAMPLED_DATA), &sampled.with_name(SAMPLED_DATA))
    }

    fn prepare_em(&mut self) -> Result<()> {
        let em = &self.ctx.base.em;
        let dir = self.ctx.layout.copy_model(
            &self.scenario.id,
            self.iteration,
            ModelKind::Em,
            em,
        )?;
        let from = self.dir(ModelKind::Om).join(SAMPLED_DATA);
        let to = dir.join(&em.files.dat);
        fs::copy(&from, &to)
            .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        Ok(())
    }

    fn mutate_em(&mut self) -> Result<()> {
        if !self.scenario.touches(ModelKind::Em) {
            return Ok(());
        }
        let dir = self.dir(ModelKind::Em);
        let files = &self.ctx.base.em.files;
        if let Some(retro) = &self.scenario.retro {
            rewrite(&dir.join(&files.starter), |starter| retro.apply(starter))
                .context("retro")?;
        }
        if let Some(estimation) = &self.scenario.estimation {
            rewrite(&dir.join(&files.ctl), |ctl| estimation.apply(ctl)).context("estimation")?;
        }
        Ok(())
    }
}

/// The data file the operating model actually read, per its starter.
fn om_data_name(dir: &Path, files: &ModelFiles) -> Result<String> {
    let starter = read_document(&dir.join(&files.starter))?;
    Ok(model_file_names(&starter)
        .map(|(dat, _)| dat)
        .unwrap_or_else(|| files.dat.clone()))
}
