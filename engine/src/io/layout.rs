//! The `<root>/<scenario>/<iteration>/{om,em}` directory tree.
//!
//! The tree is the durable record of batch progress: every iteration directory holds a
//! `status.json` [`UnitRecord`], and re-scanning the tree is how an interrupted batch
//! resumes.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::types::ModelKind;
use crate::io::unit_state::{UnitRecord, UnitState, load_record_if_exists};

pub const STATUS_FILE: &str = "status.json";

/// File names of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub ctl: String,
    pub dat: String,
    pub starter: String,
    pub forecast: String,
    /// Parameter file, required for the operating model only.
    pub par: Option<String>,
}

impl ModelFiles {
    pub fn om_default() -> Self {
        Self {
            ctl: "om.ctl".to_string(),
            dat: "om.dat".to_string(),
            starter: "starter.ss".to_string(),
            forecast: "forecast.ss".to_string(),
            par: Some("ss3.par".to_string()),
        }
    }

    pub fn em_default() -> Self {
        Self {
            ctl: "em.ctl".to_string(),
            dat: "em.dat".to_string(),
            starter: "starter.ss".to_string(),
            forecast: "forecast.ss".to_string(),
            par: None,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![
            self.ctl.as_str(),
            self.dat.as_str(),
            self.starter.as_str(),
            self.forecast.as_str(),
        ];
        names.extend(self.par.as_deref());
        names
    }
}

/// A base model directory and the files copied from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseModel {
    pub dir: PathBuf,
    pub files: ModelFiles,
}

impl BaseModel {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.files.names() {
            let path = self.path(name);
            if !path.is_file() {
                bail!("base model file {} does not exist", path.display());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseModels {
    pub om: BaseModel,
    pub em: BaseModel,
}

impl BaseModels {
    pub fn get(&self, kind: ModelKind) -> &BaseModel {
        match kind {
            ModelKind::Om => &self.om,
            ModelKind::Em => &self.em,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.om.validate().context("operating model")?;
        self.em.validate().context("estimation model")
    }
}

/// What to do with iterations that already have a terminal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RerunPolicy {
    /// Rerun everything, including completed iterations.
    pub force: bool,
    /// Rerun failed iterations.
    pub retry_failed: bool,
}

/// Whether an iteration should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Run,
    /// Left alone; carries the recorded terminal state.
    Skip(UnitState),
}

/// Paths and lifecycle of one batch's output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    root: PathBuf,
}

impl BatchLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scenario_dir(&self, scenario: &str) -> PathBuf {
        self.root.join(scenario)
    }

    pub fn iteration_dir(&self, scenario: &str, iteration: u32) -> PathBuf {
        self.scenario_dir(scenario).join(iteration.to_string())
    }

    pub fn model_dir(&self, scenario: &str, iteration: u32, kind: ModelKind) -> PathBuf {
        self.iteration_dir(scenario, iteration).join(kind.dir_name())
    }

    pub fn status_path(&self, scenario: &str, iteration: u32) -> PathBuf {
        self.iteration_dir(scenario, iteration).join(STATUS_FILE)
    }

    pub fn load_record(&self, scenario: &str, iteration: u32) -> Result<Option<UnitRecord>> {
        load_record_if_exists(&self.status_path(scenario, iteration))
    }

    /// Decide whether `iteration` runs under `policy`.
    ///
    /// Completed iterations run only when forced, failed ones when forced or retried.
    /// Interrupted iterations (non-terminal record) and unseen ones always run.
    pub fn claim(&self, scenario: &str, iteration: u32, policy: RerunPolicy) -> Result<Claim> {
        let claim = match self.load_record(scenario, iteration)? {
            Some(record) if record.state == UnitState::Complete && !policy.force => {
                Claim::Skip(record.state)
            }
            Some(record)
                if record.state == UnitState::Failed && !(policy.force || policy.retry_failed) =>
            {
                Claim::Skip(record.state)
            }
            _ => Claim::Run,
        };
        debug!(scenario, iteration, ?claim, "claimed iteration");
        Ok(claim)
    }

    /// Wipe the iteration directory and copy both base models into it.
    #[instrument(skip(self, base))]
    pub fn prepare_iteration(&self, scenario: &str, iteration: u32, base: &BaseModels) -> Result<()> {
        self.reset_iteration(scenario, iteration)?;
        for kind in ModelKind::ALL {
            self.copy_model(scenario, iteration, kind, base.get(kind))?;
        }
        Ok(())
    }

    /// Remove whatever an earlier attempt left and recreate the empty iteration directory.
    pub fn reset_iteration(&self, scenario: &str, iteration: u32) -> Result<PathBuf> {
        let dir = self.iteration_dir(scenario, iteration);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }

    /// Copy one base model into `scenario/iteration/<kind>`.
    pub fn copy_model(
        &self,
        scenario: &str,
        iteration: u32,
        kind: ModelKind,
        base: &BaseModel,
    ) -> Result<PathBuf> {
        let target = self.model_dir(scenario, iteration, kind);
        fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        for name in base.files.names() {
            let from = base.path(name);
            let to = target.join(name);
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        }
        debug!(scenario, iteration, model = %kind, "copied base model");
        Ok(target)
    }

    /// Create `scenario/iteration/{om,em}` for every claimed iteration.
    ///
    /// Iterations skipped by `policy` are left untouched. Returns the iterations
    /// that were (re)created.
    pub fn prepare(
        &self,
        scenario: &str,
        iterations: &[u32],
        base: &BaseModels,
        policy: RerunPolicy,
    ) -> Result<Vec<u32>> {
        let mut prepared = Vec::new();
        for &iteration in iterations {
            match self.claim(scenario, iteration, policy)? {
                Claim::Run => {
                    self.prepare_iteration(scenario, iteration, base)?;
                    prepared.push(iteration);
                }
                Claim::Skip(state) => {
                    info!(scenario, iteration, ?state, "keeping existing iteration");
                }
            }
        }
        Ok(prepared)
    }

    /// Every recorded unit of `scenario`, ordered by iteration.
    pub fn enumerate_records(&self, scenario: &str) -> Result<Vec<UnitRecord>> {
        let dir = self.scenario_dir(scenario);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut iterations = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            if let Some(iteration) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            {
                iterations.push(iteration);
            }
        }
        iterations.sort_unstable();

        let mut records = Vec::new();
        for iteration in iterations {
            if let Some(record) = self.load_record(scenario, iteration)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Iterations of `scenario` with a terminal record, completed or failed. These are
    /// the units a resumed batch has no reason to revisit.
    pub fn enumerate_terminal(&self, scenario: &str) -> Result<BTreeSet<u32>> {
        Ok(self
            .enumerate_records(scenario)?
            .into_iter()
            .filter(|record| record.state.is_terminal())
            .map(|record| record.iteration)
            .collect())
    }

    /// Iterations of `scenario` that finished successfully; a subset of
    /// [`Self::enumerate_terminal`].
    pub fn enumerate_completed(&self, scenario: &str) -> Result<BTreeSet<u32>> {
        self.enumerate_in_state(scenario, UnitState::Complete)
    }

    pub fn enumerate_failed(&self, scenario: &str) -> Result<BTreeSet<u32>> {
        self.enumerate_in_state(scenario, UnitState::Failed)
    }

    fn enumerate_in_state(&self, scenario: &str, state: UnitState) -> Result<BTreeSet<u32>> {
        Ok(self
            .enumerate_records(scenario)?
            .into_iter()
            .filter(|record| record.state == state)
            .map(|record| record.iteration)
            .collect())
    }

    /// Scenario directories present under the root.
    pub fn scenarios(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("read {}", self.root.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.root.display()))?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a scenario tree. Returns whether anything was removed.
    pub fn clean_scenario(&self, scenario: &str) -> Result<bool> {
        let dir = self.scenario_dir(scenario);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        info!(scenario, "removed scenario tree");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::unit_state::write_record;
    use crate::test_support::write_base_models;

    fn setup() -> (tempfile::TempDir, BatchLayout, BaseModels) {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = write_base_models(&temp.path().join("base")).expect("base");
        let layout = BatchLayout::new(temp.path().join("runs"));
        (temp, layout, base)
    }

    fn finish(layout: &BatchLayout, scenario: &str, iteration: u32, state: UnitState) {
        let mut record = UnitRecord::new(scenario, iteration, 0);
        record.state = state;
        write_record(&layout.status_path(scenario, iteration), &record).expect("record");
    }

    #[test]
    fn prepare_copies_both_models() {
        let (_temp, layout, base) = setup();
        let prepared = layout
            .prepare("F0", &[1, 2], &base, RerunPolicy::default())
            .expect("prepare");
        assert_eq!(prepared, vec![1, 2]);
        for name in base.om.files.names() {
            assert!(layout.model_dir("F0", 2, ModelKind::Om).join(name).is_file());
        }
        for name in base.em.files.names() {
            assert!(layout.model_dir("F0", 2, ModelKind::Em).join(name).is_file());
        }
    }

    #[test]
    fn prepare_leaves_completed_iterations_alone() {
        let (_temp, layout, base) = setup();
        layout
            .prepare("F0", &[1], &base, RerunPolicy::default())
            .expect("prepare");
        let result = layout.model_dir("F0", 1, ModelKind::Em).join("Report.sso");
        fs::write(&result, "estimates").expect("result");
        finish(&layout, "F0", 1, UnitState::Complete);

        let prepared = layout
            .prepare("F0", &[1], &base, RerunPolicy::default())
            .expect("prepare again");
        assert!(prepared.is_empty());
        assert_eq!(fs::read_to_string(&result).expect("read"), "estimates");

        let forced = RerunPolicy {
            force: true,
            retry_failed: false,
        };
        assert_eq!(layout.prepare("F0", &[1], &base, forced).expect("force"), vec![1]);
        assert!(!result.exists());
    }

    #[test]
    fn claim_follows_policy() {
        let (_temp, layout, _base) = setup();
        finish(&layout, "F0", 1, UnitState::Failed);
        finish(&layout, "F0", 2, UnitState::OmSolved);
        let retry = RerunPolicy {
            force: false,
            retry_failed: true,
        };
        assert_eq!(
            layout.claim("F0", 1, RerunPolicy::default()).expect("claim"),
            Claim::Skip(UnitState::Failed)
        );
        assert_eq!(layout.claim("F0", 1, retry).expect("claim"), Claim::Run);
        assert_eq!(
            layout.claim("F0", 2, RerunPolicy::default()).expect("claim"),
            Claim::Run
        );
        assert_eq!(
            layout.claim("F0", 3, RerunPolicy::default()).expect("claim"),
            Claim::Run
        );
    }

    #[test]
    fn enumerates_by_state() {
        let (_temp, layout, _base) = setup();
        finish(&layout, "F0", 1, UnitState::Complete);
        finish(&layout, "F0", 2, UnitState::Failed);
        finish(&layout, "F0", 10, UnitState::Complete);
        fs::create_dir_all(layout.scenario_dir("F0").join("notes")).expect("stray dir");

        assert_eq!(
            layout.enumerate_completed("F0").expect("completed"),
            BTreeSet::from([1, 10])
        );
        assert_eq!(
            layout.enumerate_failed("F0").expect("failed"),
            BTreeSet::from([2])
        );
        assert_eq!(
            layout.enumerate_terminal("F0").expect("terminal"),
            BTreeSet::from([1, 2, 10])
        );
        assert!(layout.enumerate_completed("missing").expect("none").is_empty());
        assert_eq!(layout.scenarios().expect("scenarios"), vec!["F0".to_string()]);
    }

    #[test]
    fn clean_removes_scenario() {
        let (_temp, layout, _base) = setup();
        finish(&layout, "F0", 1, UnitState::Complete);
        assert!(layout.clean_scenario("F0").expect("clean"));
        assert!(!layout.clean_scenario("F0").expect("clean again"));
    }
}
