//! Batch definition files.
//!
//! A batch is a TOML file naming the output root, the base models, how to run the
//! solver and the scenarios to simulate. Relative paths resolve against the file's
//! directory. See `demos/batch.toml`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use engine::io::layout::{BaseModel, BaseModels, BatchLayout, ModelFiles};
use engine::io::solver::SolverOptions;
use serde::Deserialize;

use crate::scenario::{Scenario, ScenarioSpec};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    pub batch: BatchMeta,
    pub model: ModelConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BatchMeta {
    /// Slug naming the batch (`[a-z0-9_-]+`).
    pub id: String,
    /// Output tree root.
    pub root: PathBuf,
    /// Number of iterations per scenario; iterations are numbered from 1.
    pub iterations: u32,
    /// Iteration `i` is seeded with `base_seed + i`.
    #[serde(default)]
    pub base_seed: u64,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_jobs() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub om: ModelSource,
    pub em: ModelSource,
}

/// A base model directory; unset file names take the conventional defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelSource {
    pub dir: PathBuf,
    pub ctl: Option<String>,
    pub dat: Option<String>,
    pub starter: Option<String>,
    pub forecast: Option<String>,
    pub par: Option<String>,
}

impl ModelSource {
    fn to_base(&self, mut files: ModelFiles) -> BaseModel {
        let pick = |name: &Option<String>, slot: &mut String| {
            if let Some(name) = name {
                slot.clone_from(name);
            }
        };
        pick(&self.ctl, &mut files.ctl);
        pick(&self.dat, &mut files.dat);
        pick(&self.starter, &mut files.starter);
        pick(&self.forecast, &mut files.forecast);
        if self.par.is_some() {
            files.par.clone_from(&self.par);
        }
        BaseModel {
            dir: self.dir.clone(),
            files,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Executable path or bare name; unset searches `PATH` for the usual names.
    pub bin: Option<PathBuf>,
    /// Extra flags passed before the injected ones.
    pub options: String,
    pub timeout_secs: u64,
    pub settle_ms: u64,
    /// Compute the Hessian for estimation-model runs.
    pub hess: bool,
    pub output_limit_bytes: usize,
    pub env: BTreeMap<String, String>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let defaults = SolverOptions::default();
        Self {
            bin: None,
            options: String::new(),
            timeout_secs: defaults.timeout.as_secs(),
            settle_ms: defaults.settle.as_millis() as u64,
            hess: false,
            output_limit_bytes: defaults.output_limit_bytes,
            env: BTreeMap::new(),
        }
    }
}

impl SolverConfig {
    pub fn to_options(&self) -> SolverOptions {
        SolverOptions {
            extra_args: self.options.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            settle: Duration::from_millis(self.settle_ms),
            hess: self.hess,
            output_limit_bytes: self.output_limit_bytes,
            env: self.env.clone(),
        }
    }
}

/// A loaded, validated batch with resolved paths and expanded scenarios.
#[derive(Debug, Clone)]
pub struct Batch {
    /// The batch file this was loaded from.
    pub source: PathBuf,
    pub file: BatchFile,
    pub base: BaseModels,
    pub scenarios: Vec<Scenario>,
}

impl Batch {
    pub fn layout(&self) -> BatchLayout {
        BatchLayout::new(&self.file.batch.root)
    }

    pub fn iterations(&self) -> Vec<u32> {
        (1..=self.file.batch.iterations).collect()
    }

    pub fn seed(&self, iteration: u32) -> u64 {
        self.file.batch.base_seed.wrapping_add(u64::from(iteration))
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.id == id)
    }
}

impl BatchFile {
    /// Load a batch file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read batch {}", path.display()))?;
        let mut file = Self::parse_str(&contents)
            .with_context(|| format!("parse batch {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        file.resolve_paths(base_dir);
        Ok(file)
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let file: BatchFile = toml::from_str(contents).context("parse batch toml")?;
        file.validate()?;
        Ok(file)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        };
        resolve(&mut self.batch.root);
        resolve(&mut self.model.om.dir);
        resolve(&mut self.model.em.dir);
        // A bare name is looked up on PATH, anything with a separator is a path.
        if let Some(bin) = &mut self.solver.bin
            && bin.components().count() > 1
        {
            resolve(bin);
        }
    }

    fn validate(&self) -> Result<()> {
        validate_slug("batch.id", &self.batch.id)?;
        if self.batch.root.as_os_str().is_empty() {
            bail!("batch.root must be non-empty");
        }
        if self.batch.iterations == 0 {
            bail!("batch.iterations must be > 0");
        }
        if self.batch.jobs == 0 {
            bail!("batch.jobs must be > 0");
        }
        if self.solver.timeout_secs == 0 {
            bail!("solver.timeout_secs must be > 0");
        }
        if self.solver.output_limit_bytes == 0 {
            bail!("solver.output_limit_bytes must be > 0");
        }
        for key in self.solver.env.keys() {
            if key.trim().is_empty() || key.contains('=') {
                bail!("solver.env key {key:?} is not a valid variable name");
            }
        }
        if self.scenarios.is_empty() {
            bail!("scenarios must be a non-empty array");
        }
        Ok(())
    }

    /// Base models with default file names filled in.
    pub fn base_models(&self) -> BaseModels {
        BaseModels {
            om: self.model.om.to_base(ModelFiles::om_default()),
            em: self.model.em.to_base(ModelFiles::em_default()),
        }
    }

    /// Expand scenarios and check every factor against the base models, before
    /// anything is written.
    pub fn into_batch(self, source: &Path) -> Result<Batch> {
        let base = self.base_models();
        base.validate().context("base models")?;

        let mut seen = BTreeSet::new();
        let mut scenarios = Vec::with_capacity(self.scenarios.len());
        for (index, spec) in self.scenarios.iter().enumerate() {
            let scenario = Scenario::from_spec(spec)
                .with_context(|| format!("scenarios[{index}] invalid"))?;
            if !seen.insert(scenario.id.clone()) {
                bail!("duplicate scenario id {}", scenario.id);
            }
            scenario
                .preflight(&base)
                .with_context(|| format!("scenario {} does not apply to the base models", scenario.id))?;
            scenarios.push(scenario);
        }
        Ok(Batch {
            source: source.to_path_buf(),
            file: self,
            base,
            scenarios,
        })
    }
}

/// Load, validate and preflight a batch file.
pub fn load_batch(path: &Path) -> Result<Batch> {
    BatchFile::load(path)?.into_batch(path)
}

pub(crate) fn validate_slug(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must be non-empty");
    }
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        bail!("{field} {value:?} must use [A-Za-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::test_support::write_base_models;

    const MINIMAL: &str = r#"
[batch]
id = "cod-sim"
root = "runs"
iterations = 3
base_seed = 100

[model.om]
dir = "base/om"

[model.em]
dir = "base/em"

[[scenarios]]
label = "cod"

[scenarios.fishing]
case = "F0"
years = [1971, 1972]
fisheries = [1]
fvals = [0.2]
"#;

    #[test]
    fn parses_minimal_batch_with_defaults() {
        let file = BatchFile::parse_str(MINIMAL).expect("batch parses");
        assert_eq!(file.batch.jobs, 1);
        assert_eq!(file.solver, SolverConfig::default());
        assert_eq!(file.solver.timeout_secs, 30 * 60);
        let base = file.base_models();
        assert_eq!(base.om.files, ModelFiles::om_default());
        assert_eq!(base.em.files, ModelFiles::em_default());
    }

    #[test]
    fn model_file_names_can_be_overridden() {
        let input = MINIMAL.replace(
            "dir = \"base/em\"",
            "dir = \"base/em\"\nctl = \"codEM.ctl\"\ndat = \"codEM.dat\"",
        );
        let file = BatchFile::parse_str(&input).expect("batch parses");
        let base = file.base_models();
        assert_eq!(base.em.files.ctl, "codEM.ctl");
        assert_eq!(base.em.files.dat, "codEM.dat");
        assert_eq!(base.em.files.starter, "starter.ss");
    }

    #[test]
    fn rejects_invalid_meta() {
        for (from, to, needle) in [
            ("iterations = 3", "iterations = 0", "batch.iterations"),
            ("id = \"cod-sim\"", "id = \"cod/sim\"", "batch.id"),
            ("base_seed = 100", "base_seed = 100\njobs = 0", "batch.jobs"),
        ] {
            let err = BatchFile::parse_str(&MINIMAL.replace(from, to)).expect_err(needle);
            assert!(format!("{err:#}").contains(needle), "{err:#}");
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let input = MINIMAL.replace("fvals = [0.2]", "fvals = [0.2]\nfval = [0.3]");
        assert!(BatchFile::parse_str(&input).is_err());
    }

    #[test]
    fn solver_section_maps_to_options() {
        let input = format!(
            "{MINIMAL}\n[solver]\nbin = \"ss3\"\noptions = \"-nox\"\ntimeout_secs = 60\nsettle_ms = 0\nhess = true\n\n[solver.env]\nOMP_NUM_THREADS = \"1\"\n"
        );
        let file = BatchFile::parse_str(&input).expect("batch parses");
        let options = file.solver.to_options();
        assert_eq!(options.extra_args, "-nox");
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.settle.is_zero());
        assert!(options.hess);
        assert_eq!(options.env.get("OMP_NUM_THREADS").map(String::as_str), Some("1"));
    }

    #[test]
    fn load_resolves_relative_paths_and_preflights() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_base_models(&temp.path().join("base")).expect("base");
        let path = temp.path().join("batch.toml");
        fs::write(&path, MINIMAL).expect("write batch");

        let batch = load_batch(&path).expect("load");
        assert_eq!(batch.file.batch.root, temp.path().join("runs"));
        assert_eq!(batch.base.om.dir, temp.path().join("base/om"));
        assert_eq!(batch.scenarios.len(), 1);
        assert_eq!(batch.scenarios[0].id, "F0-cod");
        assert_eq!(batch.iterations(), vec![1, 2, 3]);
        assert_eq!(batch.seed(2), 102);
        assert!(!temp.path().join("runs").exists());
    }

    #[test]
    fn missing_base_model_fails_before_any_directory_is_created() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("batch.toml");
        fs::write(&path, MINIMAL).expect("write batch");
        let err = load_batch(&path).expect_err("no base models");
        assert!(format!("{err:#}").contains("base model"), "{err:#}");
        assert!(!temp.path().join("runs").exists());
    }

    #[test]
    fn duplicate_scenarios_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_base_models(&temp.path().join("base")).expect("base");
        let path = temp.path().join("batch.toml");
        let twice = format!(
            "{MINIMAL}\n[[scenarios]]\nlabel = \"cod\"\n\n[scenarios.fishing]\ncase = \"F0\"\nyears = [1971]\nfisheries = [1]\nfvals = [0.1]\n"
        );
        fs::write(&path, twice).expect("write batch");
        let err = load_batch(&path).expect_err("duplicate");
        assert!(format!("{err:#}").contains("duplicate scenario id F0-cod"), "{err:#}");
    }
}
